mod auth;
mod catalog;
mod config;
mod database;
mod error;
mod model;
mod tmdb;

use actix_identity::IdentityMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{cookie::Key, http::header, middleware::Logger, web, App, HttpResponse, HttpServer};
use config::{Config, SystemEnvironment};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use tmdb::{MovieGateway, TmdbClient};

type Tera = web::Data<tera::Tera>;
type Db = web::Data<sled::Db>;
type Gateway = web::Data<dyn MovieGateway>;

/// bcrypt work factor used when hashing new passwords.
pub struct PasswordCost(pub u32);

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> actix_web::Error {
    debug!("{:?}", err);
    actix_web::error::ErrorInternalServerError(message)
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .finish()
}

fn render(
    tera: &tera::Tera,
    template: &str,
    ctx: &tera::Context,
) -> actix_web::Result<HttpResponse> {
    let body = tera
        .render(template, ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

/// `?error=<key>` on a form page selects the flash message to show.
#[derive(Deserialize)]
pub struct FlashQuery {
    pub error: Option<String>,
}

fn flash_message(key: &str) -> Option<&'static str> {
    match key {
        "unknown_user" => Some("That user does not exist, please try again."),
        "wrong_password" => Some("The password is wrong. Please try again."),
        "duplicate_user" => Some("That username is already taken."),
        "missing_fields" => Some("Please fill in every field."),
        _ => None,
    }
}

fn flash_context(query: &FlashQuery) -> tera::Context {
    let mut ctx = tera::Context::new();
    ctx.insert("flash", &query.error.as_deref().and_then(flash_message));
    ctx
}

fn load_templates() -> tera::Result<tera::Tera> {
    tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))
}

fn session_middleware(key: Key) -> SessionMiddleware<CookieSessionStore> {
    SessionMiddleware::builder(CookieSessionStore::default(), key)
        .cookie_name("auth-cookie".to_owned())
        .cookie_secure(false)
        .build()
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(auth::index))
        .route("/login", web::get().to(auth::login))
        .route("/login", web::post().to(auth::login_post))
        .route("/logout", web::get().to(auth::logout))
        .route("/sign-up", web::get().to(auth::sign_up_form))
        .route("/sign-up", web::post().to(auth::sign_up_post))
        .route("/home", web::get().to(catalog::home))
        .route("/find", web::get().to(catalog::find))
        .route("/find", web::post().to(catalog::find_post))
        .route("/edit", web::get().to(catalog::edit))
        .route("/edit", web::post().to(catalog::edit_post))
        .route("/add_movie", web::get().to(catalog::add_movie))
        .route("/delete", web::get().to(catalog::delete_movie))
        .route("/select", web::get().to(catalog::select))
        .route("/select", web::post().to(catalog::select));
}

fn startup_error<E: std::fmt::Display>(err: E) -> std::io::Error {
    error!("{}", err);
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("movie_ranker=debug,actix_web=info"),
    )
    .init();

    let config = Config::from_env(&SystemEnvironment).map_err(startup_error)?;
    let key = match &config.secret_key {
        Some(secret) => Key::derive_from(secret.as_bytes()),
        None => {
            warn!("SECRET_KEY is not set, sessions will not survive a restart");
            Key::generate()
        }
    };

    let tera = web::Data::new(load_templates().map_err(startup_error)?);
    let db = web::Data::new(sled::open(&config.database_path).map_err(startup_error)?);
    let gateway: Arc<dyn MovieGateway> = Arc::new(TmdbClient::new(
        reqwest::Client::new(),
        config.tmdb.clone(),
    ));
    let gateway: Gateway = web::Data::from(gateway);
    let cost = web::Data::new(PasswordCost(config.bcrypt_cost));
    if config.tmdb.access_token.is_some() {
        debug!("TMDB access token is provisioned but requests authenticate with the API key");
    }

    info!(
        "serving on {} with database {}",
        config.bind_addr,
        config.database_path.display()
    );
    let server_db = db.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(IdentityMiddleware::default())
            .wrap(session_middleware(key.clone()))
            .wrap(Logger::default())
            .app_data(tera.clone())
            .app_data(server_db.clone())
            .app_data(gateway.clone())
            .app_data(cost.clone())
            .configure(routes)
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    db.flush().map_err(startup_error)?;
    Ok(())
}
