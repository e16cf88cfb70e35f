//! Server-rendered pages and email bodies (minijinja templates compiled
//! into the binary).

use anyhow::Context;
use axum::{
    middleware::from_fn_with_state,
    response::Html,
    routing::{get, post},
    Router,
};
use minijinja::Environment;
use serde_json::{Map, Value};

use crate::{auth::guard::require_login, state::AppState};

pub mod handlers;

const TEMPLATES: &[(&str, &str)] = &[
    ("base.html", include_str!("../../templates/base.html")),
    ("overview.html", include_str!("../../templates/overview.html")),
    ("tour.html", include_str!("../../templates/tour.html")),
    ("login.html", include_str!("../../templates/login.html")),
    ("account.html", include_str!("../../templates/account.html")),
    ("error.html", include_str!("../../templates/error.html")),
    ("email/base.html", include_str!("../../templates/email/base.html")),
    ("email/welcome.html", include_str!("../../templates/email/welcome.html")),
    ("email/welcome.txt", include_str!("../../templates/email/welcome.txt")),
    ("email/password_reset.html", include_str!("../../templates/email/password_reset.html")),
    ("email/password_reset.txt", include_str!("../../templates/email/password_reset.txt")),
];

pub struct Views {
    env: Environment<'static>,
}

impl Views {
    pub fn new() -> anyhow::Result<Self> {
        let mut env = Environment::new();
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("template {name}"))?;
        }
        Ok(Self { env })
    }

    pub fn render(&self, name: &str, ctx: &Value) -> anyhow::Result<String> {
        let template = self.env.get_template(name)?;
        Ok(template.render(ctx)?)
    }

    /// A full page: `title` and the signed-in `user` (if any) are available
    /// to the layout, `ctx` adds page specific values.
    pub fn page(
        &self,
        name: &str,
        title: &str,
        user: Option<Value>,
        ctx: Map<String, Value>,
    ) -> anyhow::Result<Html<String>> {
        let mut all = ctx;
        all.insert("title".into(), Value::String(title.to_string()));
        all.insert("user".into(), user.unwrap_or(Value::Null));
        Ok(Html(self.render(name, &Value::Object(all))?))
    }

    pub fn error_page(&self, msg: &str) -> anyhow::Result<Html<String>> {
        let mut ctx = Map::new();
        ctx.insert("msg".into(), Value::String(msg.to_string()));
        self.page("error.html", "Something went wrong!", None, ctx)
    }

    /// HTML body and its plain-text alternative for `email/{name}`.
    pub fn email(&self, name: &str, ctx: &Value) -> anyhow::Result<(String, String)> {
        let html = self.render(&format!("email/{name}.html"), ctx)?;
        let text = self.render(&format!("email/{name}.txt"), ctx)?;
        Ok((html, text))
    }
}

pub fn router(state: &AppState) -> Router<AppState> {
    let login = || from_fn_with_state(state.clone(), require_login);

    Router::new()
        .route("/", get(handlers::overview))
        .route("/tour/:slug", get(handlers::tour))
        .route("/login", get(handlers::login_form))
        .route("/me", get(handlers::account).route_layer(login()))
        .route("/my-tours", get(handlers::my_tours).route_layer(login()))
        .route(
            "/submit-user-data",
            post(handlers::update_user_data).route_layer(login()),
        )
}
