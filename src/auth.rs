use crate::database::UserDb;
use crate::error::Error;
use crate::model::User;
use crate::{flash_context, log_error, redirect, render, Db, FlashQuery, PasswordCost, Tera};
use actix_identity::{Identity, IdentityExt};
use actix_web::{dev::Payload, web, FromRequest, HttpMessage, HttpRequest, HttpResponse};
use log::info;
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};

/// The logged-in user. Extracting it from a request that has no valid
/// session redirects to the login page. The session stores the user id.
#[derive(Debug)]
pub struct CurrentUser {
    pub id: u64,
    pub user: User,
}

impl FromRequest for CurrentUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(current_user(req))
    }
}

fn current_user(req: &HttpRequest) -> actix_web::Result<CurrentUser> {
    let identity = req.get_identity().map_err(|_| Error::Unauthenticated)?;
    let id = identity
        .id()
        .ok()
        .and_then(|id| id.parse::<u64>().ok())
        .ok_or(Error::Unauthenticated)?;
    let db = req
        .app_data::<Db>()
        .ok_or_else(|| log_error("sled::Db is not registered", "Configuration error"))?;
    match db.get_user(id).map_err(Error::from)? {
        Some(user) => Ok(CurrentUser { id, user }),
        None => {
            info!("session of deleted user {} dropped", id);
            identity.logout();
            Err(Error::Unauthenticated.into())
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SignUpParams {
    pub username: String,
    pub fname: String,
    pub lname: String,
    pub phone: String,
    pub password: String,
    pub age: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginParams {
    pub username: String,
    pub password: String,
}

/// Creates the account, storing only a salted bcrypt hash of the password.
pub fn sign_up<D>(db: &D, params: &SignUpParams, cost: u32) -> Result<u64, Error>
where
    D: UserDb,
    Error: From<D::Error>,
{
    let required = [
        &params.username,
        &params.fname,
        &params.lname,
        &params.phone,
        &params.password,
    ];
    if required.iter().any(|field| field.trim().is_empty()) {
        return Err(Error::MissingFields);
    }
    let age = params
        .age
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::MissingFields)?;
    if db.get_user_by_username(&params.username)?.is_some() {
        return Err(Error::DuplicateUser);
    }
    let user = User {
        username: params.username.clone(),
        first_name: params.fname.clone(),
        last_name: params.lname.clone(),
        phone: params.phone.clone(),
        password_hash: bcrypt::hash(&params.password, cost)?,
        age,
    };
    db.add_user(&user)?.ok_or(Error::DuplicateUser)
}

pub fn log_in<D>(db: &D, params: &LoginParams) -> Result<(u64, User), Error>
where
    D: UserDb,
    Error: From<D::Error>,
{
    if params.username.trim().is_empty() || params.password.trim().is_empty() {
        return Err(Error::MissingFields);
    }
    let (id, user) = db
        .get_user_by_username(&params.username)?
        .ok_or(Error::UnknownUser)?;
    if !bcrypt::verify(&params.password, &user.password_hash)? {
        return Err(Error::WrongPassword);
    }
    Ok((id, user))
}

fn establish_session(req: &HttpRequest, user_id: u64) -> actix_web::Result<()> {
    Identity::login(&req.extensions(), user_id.to_string())
        .map_err(|err| log_error(err, "Session error"))?;
    Ok(())
}

/// Auth failures go back to the form they came from with a flash message,
/// anything else is a real error.
fn back_to(form: &str, err: Error) -> actix_web::Result<HttpResponse> {
    match err.flash_key() {
        Some(key) => Ok(redirect(&format!("{}?error={}", form, key))),
        None => Err(err.into()),
    }
}

/// A session only counts as logged in if its user still exists.
pub async fn index(user: Option<CurrentUser>, tera: Tera) -> actix_web::Result<HttpResponse> {
    let mut ctx = tera::Context::new();
    ctx.insert("logged_in", &user.is_some());
    render(&tera, "authenticate.html", &ctx)
}

pub async fn login(tera: Tera, query: web::Query<FlashQuery>) -> actix_web::Result<HttpResponse> {
    render(&tera, "login.html", &flash_context(&query))
}

pub async fn login_post(
    req: HttpRequest,
    params: web::Form<LoginParams>,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    match log_in(db.get_ref(), &params) {
        Ok((user_id, _user)) => {
            establish_session(&req, user_id)?;
            Ok(redirect("/home"))
        }
        Err(err) => back_to("/login", err),
    }
}

pub async fn logout(id: Option<Identity>) -> actix_web::Result<HttpResponse> {
    if let Some(id) = id {
        id.logout();
    }
    Ok(redirect("/"))
}

pub async fn sign_up_form(
    tera: Tera,
    query: web::Query<FlashQuery>,
) -> actix_web::Result<HttpResponse> {
    render(&tera, "signup.html", &flash_context(&query))
}

pub async fn sign_up_post(
    req: HttpRequest,
    params: web::Form<SignUpParams>,
    db: Db,
    cost: web::Data<PasswordCost>,
) -> actix_web::Result<HttpResponse> {
    match sign_up(db.get_ref(), &params, cost.0) {
        Ok(user_id) => {
            info!("new user {} ({})", params.username, user_id);
            establish_session(&req, user_id)?;
            Ok(redirect("/home"))
        }
        Err(err) => back_to("/sign-up", err),
    }
}
