use axum::response::Html;
use minijinja::Environment;
use serde::Serialize;

use crate::error::AppError;

const TEMPLATES: &[(&str, &str)] = &[
    ("layout.html", include_str!("../templates/layout.html")),
    ("home.html", include_str!("../templates/home.html")),
    ("expenses.html", include_str!("../templates/expenses.html")),
    ("tokens.html", include_str!("../templates/tokens.html")),
    ("userinfo.html", include_str!("../templates/userinfo.html")),
    ("error.html", include_str!("../templates/error.html")),
];

/// Page templates, compiled into the binary.
pub struct Views {
    env: Environment<'static>,
}

impl Views {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self { env })
    }

    /// Renders the view `name` (`home`, `expenses`, ...) with `context`.
    pub fn render<S: Serialize>(&self, name: &str, context: &S) -> Result<Html<String>, AppError> {
        let template = self.env.get_template(&format!("{name}.html"))?;
        Ok(Html(template.render(context)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn home_anonymous() {
        let views = Views::new().unwrap();

        let Html(page) = views
            .render(
                "home",
                &json!({ "path": "/", "user": null, "total": null, "count": null }),
            )
            .unwrap();

        assert!(page.contains("Please <a href=\"/login\">log in</a>"));
        assert!(!page.contains("expense-count"));
    }

    #[test]
    fn home_with_totals() {
        let views = Views::new().unwrap();

        let Html(page) = views
            .render(
                "home",
                &json!({
                    "path": "/",
                    "user": { "name": "Ada" },
                    "total": 15.5,
                    "count": 2
                }),
            )
            .unwrap();

        assert!(page.contains("<span id=\"expense-count\">2</span>"));
        assert!(page.contains("<span id=\"expense-total\">15.5</span>"));
        assert!(page.contains("<span id=\"user-name\">Ada</span>"));
    }

    #[test]
    fn values_are_escaped() {
        let views = Views::new().unwrap();

        let Html(page) = views
            .render(
                "expenses",
                &json!({
                    "path": "/expenses",
                    "user": { "name": "Ada" },
                    "expenses": [{ "value": 1, "description": "<script>alert(1)</script>" }]
                }),
            )
            .unwrap();

        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
    }

    #[test]
    fn unknown_view() {
        let views = Views::new().unwrap();

        assert!(matches!(
            views.render("missing", &json!({})),
            Err(AppError::Template(_))
        ));
    }
}
