use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;

use crate::context::AppContext;
use crate::observability::HTTP_REQUESTS_TOTAL;
use crate::session::{Session, SessionId};
use crate::workflow::Outcome;

pub const SESSION_COOKIE: &str = "session_id";

/// Routes:
/// - `GET /`
/// - `GET|POST /search-availability` (form: `start`, `end`)
/// - `GET|POST /search-availability-json` (`start`, `end`, `room_id`)
/// - `GET /choose-room/:id`
/// - `GET /book-room?id=&s=&e=`
/// - `GET|POST /make-reservation` (form: `first_name`, `last_name`, `email`, `phone`)
/// - `GET /reservation-summary`
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/search-availability", get(search_page).post(post_availability))
        .route(
            "/search-availability-json",
            get(availability_json_query).post(availability_json_form),
        )
        .route("/choose-room/:id", get(choose_room))
        .route("/book-room", get(book_room))
        .route("/make-reservation", get(reservation_form).post(post_reservation))
        .route("/reservation-summary", get(summary))
        .with_state(ctx)
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn serve(
    ctx: Arc<AppContext>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchForm {
    start: String,
    end: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RoomQuery {
    start: String,
    end: String,
    room_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BookLink {
    id: String,
    s: String,
    e: String,
}

/// The caller's session id, minted when the request carried none.
struct Visitor {
    id: SessionId,
    fresh: bool,
}

impl Visitor {
    fn from_headers(headers: &HeaderMap) -> Self {
        let existing = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .and_then(|(_, value)| SessionId::parse(value));
        match existing {
            Some(id) => Self { id, fresh: false },
            None => Self {
                id: SessionId::generate(),
                fresh: true,
            },
        }
    }

    fn cookie(&self, ctx: &AppContext) -> Option<HeaderValue> {
        if !self.fresh {
            return None;
        }
        let mut cookie = format!(
            "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.id,
            ctx.config.session_lifetime.as_secs()
        );
        if ctx.config.production {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }
}

fn respond(ctx: &AppContext, route: &'static str, outcome: Outcome, visitor: &Visitor) -> Response {
    let mut response = match outcome {
        Outcome::Render { view, data } => match ctx.renderer.render(view, &data) {
            Ok(page) => (StatusCode::OK, [(CONTENT_TYPE, page.content_type)], page.body).into_response(),
            Err(e) => {
                tracing::error!(view, "{e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Outcome::Redirect(to) => Redirect::to(&to).into_response(),
        Outcome::Json { status, body } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(body)).into_response()
        }
    };

    if let Some(cookie) = visitor.cookie(ctx) {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route, "status" => status).increment(1);
    response
}

async fn home(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let session = Session::new(ctx.sessions.as_ref(), &visitor.id);
    let outcome = ctx.workflow.home(&session);
    respond(&ctx, "home", outcome, &visitor)
}

async fn search_page(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let session = Session::new(ctx.sessions.as_ref(), &visitor.id);
    let outcome = ctx.workflow.search_page(&session);
    respond(&ctx, "search_page", outcome, &visitor)
}

async fn post_availability(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Form(form): Form<SearchForm>,
) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let session = Session::new(ctx.sessions.as_ref(), &visitor.id);
    let outcome = ctx.workflow.post_availability(&session, &form.start, &form.end).await;
    respond(&ctx, "post_availability", outcome, &visitor)
}

async fn availability_json_query(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(q): Query<RoomQuery>,
) -> Response {
    availability_json(ctx, headers, q).await
}

async fn availability_json_form(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Form(q): Form<RoomQuery>,
) -> Response {
    availability_json(ctx, headers, q).await
}

async fn availability_json(ctx: Arc<AppContext>, headers: HeaderMap, q: RoomQuery) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let outcome = ctx.workflow.availability_json(&q.start, &q.end, &q.room_id).await;
    respond(&ctx, "availability_json", outcome, &visitor)
}

async fn choose_room(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let session = Session::new(ctx.sessions.as_ref(), &visitor.id);
    let outcome = ctx.workflow.choose_room(&session, &room_id).await;
    respond(&ctx, "choose_room", outcome, &visitor)
}

async fn book_room(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(link): Query<BookLink>,
) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let session = Session::new(ctx.sessions.as_ref(), &visitor.id);
    let outcome = ctx.workflow.book_room(&session, &link.id, &link.s, &link.e).await;
    respond(&ctx, "book_room", outcome, &visitor)
}

async fn reservation_form(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let session = Session::new(ctx.sessions.as_ref(), &visitor.id);
    let outcome = ctx.workflow.reservation_form(&session);
    respond(&ctx, "reservation_form", outcome, &visitor)
}

async fn post_reservation(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Form(values): Form<HashMap<String, String>>,
) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let session = Session::new(ctx.sessions.as_ref(), &visitor.id);
    let outcome = ctx.workflow.post_reservation(&session, values).await;
    respond(&ctx, "post_reservation", outcome, &visitor)
}

async fn summary(State(ctx): State<Arc<AppContext>>, headers: HeaderMap) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let session = Session::new(ctx.sessions.as_ref(), &visitor.id);
    let outcome = ctx.workflow.summary(&session);
    respond(&ctx, "summary", outcome, &visitor)
}
