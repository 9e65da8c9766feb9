//! Page handlers.
//!
//! Data pages degrade instead of failing: when the backend or the provider
//! can't be reached the error is logged and the page renders with `null`
//! data.

use axum::{
    extract::{Query, State},
    http::Uri,
    response::{Html, Redirect},
};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::{
    auth::{AccessToken, OidcContext, OidcSession, RequireAuth, ReturnTo, UserProfile},
    error::AppError,
    fetch::{fetch_protected_resource, FetchError, FetchOptions},
    AppState,
};

/// Count and sum of the `value` field of the backend's expenses.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseSummary {
    /// An integer when every value is one, as the backend sent them.
    pub total: Number,
    pub count: usize,
}

impl ExpenseSummary {
    /// `None` when an expense has no numeric `value`.
    pub fn of(expenses: &[Value]) -> Option<Self> {
        let mut integer_total = Some(0i64);
        let mut float_total = 0.0;
        for expense in expenses {
            let value = expense.get("value")?;
            float_total += value.as_f64()?;
            integer_total = integer_total
                .zip(value.as_i64())
                .and_then(|(total, value)| total.checked_add(value));
        }

        let total = match integer_total {
            Some(total) => Number::from(total),
            None => Number::from_f64(float_total)?,
        };
        Some(Self {
            total,
            count: expenses.len(),
        })
    }
}

async fn load_expenses(state: &AppState, session: &OidcSession) -> Result<Vec<Value>, FetchError> {
    fetch_protected_resource(
        &state.http,
        session,
        &state.config.expenses_url(),
        FetchOptions::default(),
    )
    .await?
    .json()
    .await
    .map_err(FetchError::Decode)
}

async fn load_userinfo(state: &AppState, session: &OidcSession) -> Result<UserProfile, FetchError> {
    fetch_protected_resource(
        &state.http,
        session,
        &state.config.userinfo_url(),
        FetchOptions::default(),
    )
    .await?
    .json()
    .await
    .map_err(FetchError::Decode)
}

#[derive(Serialize)]
struct HomeView<'a> {
    path: &'a str,
    user: Option<&'a UserProfile>,
    total: Option<Number>,
    count: Option<usize>,
}

pub async fn home(
    State(state): State<AppState>,
    uri: Uri,
    context: OidcContext,
) -> Result<Html<String>, AppError> {
    let mut summary = None;
    if context.is_authenticated() {
        match load_expenses(&state, context.record()).await {
            Ok(expenses) => {
                summary = ExpenseSummary::of(&expenses);
                if summary.is_none() {
                    tracing::error!("Expense totals not computed: a value is not a number");
                }
            }
            Err(e) => tracing::error!("Expense totals not loaded: {}", e),
        }
    }

    let (total, count) = match summary {
        Some(summary) => (Some(summary.total), Some(summary.count)),
        None => (None, None),
    };
    let view = HomeView {
        path: uri.path(),
        user: context.user(),
        total,
        count,
    };
    state.views.render("home", &view)
}

#[derive(Serialize)]
struct ExpensesView<'a> {
    path: &'a str,
    user: Option<&'a UserProfile>,
    /// The backend's list, as received.
    expenses: Option<Vec<Value>>,
}

pub async fn expenses(
    State(state): State<AppState>,
    uri: Uri,
    context: OidcContext,
) -> Result<Html<String>, AppError> {
    let mut expenses = None;
    if context.is_authenticated() {
        match load_expenses(&state, context.record()).await {
            Ok(list) => expenses = Some(list),
            Err(e) => tracing::error!("Expenses not loaded: {}", e),
        }
    }

    let view = ExpensesView {
        path: uri.path(),
        user: context.user(),
        expenses,
    };
    state.views.render("expenses", &view)
}

#[derive(Serialize)]
struct TokensView<'a> {
    path: &'a str,
    user: Option<&'a UserProfile>,
    id_token: Option<&'a str>,
    access_token: Option<&'a AccessToken>,
    refresh_token: Option<&'a str>,
}

/// Shows the raw tokens of the session, for demonstration.
pub async fn tokens(
    State(state): State<AppState>,
    uri: Uri,
    RequireAuth(context): RequireAuth,
) -> Result<Html<String>, AppError> {
    let tokens = context.tokens();
    let view = TokensView {
        path: uri.path(),
        user: context.user(),
        id_token: tokens.map(|tokens| tokens.id_token.as_str()),
        access_token: tokens.map(|tokens| &tokens.access_token),
        refresh_token: tokens.and_then(|tokens| tokens.refresh_token.as_deref()),
    };
    state.views.render("tokens", &view)
}

#[derive(Serialize)]
struct UserinfoView<'a> {
    path: &'a str,
    user: Option<&'a UserProfile>,
    userinfo: Option<UserProfile>,
}

pub async fn userinfo(
    State(state): State<AppState>,
    uri: Uri,
    context: OidcContext,
) -> Result<Html<String>, AppError> {
    let mut userinfo = None;
    if context.is_authenticated() {
        match load_userinfo(&state, context.record()).await {
            Ok(profile) => userinfo = Some(profile),
            Err(e) => tracing::error!("User info not loaded: {}", e),
        }
    }

    let view = UserinfoView {
        path: uri.path(),
        user: context.user(),
        userinfo,
    };
    state.views.render("userinfo", &view)
}

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    #[serde(rename = "returnTo")]
    return_to: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    Query(params): Query<LoginParams>,
    context: OidcContext,
) -> Result<Redirect, AppError> {
    let return_to = ReturnTo::parse(params.return_to.as_deref());
    let (location, request) = state.idp.authorization_request(return_to)?;
    context.save_auth_request(&request).await?;

    Ok(Redirect::to(&location))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    context: OidcContext,
) -> Result<Redirect, AppError> {
    let pending = context.take_auth_request().await?;
    if let Some(error) = params.error {
        return Err(AppError::Provider {
            error,
            description: params.error_description.unwrap_or_default(),
        });
    }

    let (Some(pending), Some(code)) = (pending, params.code) else {
        return Err(AppError::InvalidLoginState);
    };
    if params.state.as_deref() != Some(pending.state.as_str()) {
        return Err(AppError::InvalidLoginState);
    }

    let record = state.idp.complete_login(&code, &pending.nonce).await?;
    context.sign_in(&record).await?;
    let subject = record
        .user
        .as_ref()
        .and_then(|user| user.get("sub"))
        .and_then(Value::as_str)
        .unwrap_or("unknown subject");
    tracing::info!("Signed in {}", subject);

    Ok(Redirect::to(pending.return_to.as_str()))
}

pub async fn logout(
    State(state): State<AppState>,
    context: OidcContext,
) -> Result<Redirect, AppError> {
    let id_token = context.tokens().map(|tokens| tokens.id_token.clone());
    context.sign_out().await?;
    let location = state.idp.logout_url(id_token.as_deref())?;

    Ok(Redirect::to(&location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_values_sum_to_an_integer() {
        let expenses = vec![json!({ "value": 10 }), json!({ "value": 5 })];

        let summary = ExpenseSummary::of(&expenses).unwrap();

        assert_eq!(summary.count, 2);
        assert_eq!(summary.total, Number::from(15));
        assert_eq!(summary.total.to_string(), "15");
    }

    #[test]
    fn fractional_values_sum_to_a_float() {
        let expenses = vec![json!({ "value": 12.5 }), json!({ "value": 3 })];

        let summary = ExpenseSummary::of(&expenses).unwrap();

        assert_eq!(summary.total.as_f64(), Some(15.5));
        assert_eq!(summary.count, 2);
    }

    #[test]
    fn empty_list_sums_to_zero() {
        assert_eq!(
            ExpenseSummary::of(&[]),
            Some(ExpenseSummary {
                total: Number::from(0),
                count: 0
            })
        );
    }

    #[test]
    fn non_numeric_value_has_no_summary() {
        let expenses = vec![
            json!({ "value": 7 }),
            json!({ "value": "12", "description": "Lunch" }),
        ];
        assert_eq!(ExpenseSummary::of(&expenses), None);

        let expenses = vec![json!({ "description": "No value" })];
        assert_eq!(ExpenseSummary::of(&expenses), None);
    }
}
