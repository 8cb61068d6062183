use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest},
    http::Request,
    Json,
};
use comments_api::NewComment;

use crate::{CommentStore, Error, Feeds};

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub store: CommentStore,
    pub feeds: Feeds,
}

/// Body of a comment creation request
///
/// A request that is not declared as json is treated as having no content at
/// all, while a json body that does not parse is rejected as malformed.
pub struct CommentBody(pub NewComment);

#[async_trait]
impl<S, B> FromRequest<S, B> for CommentBody
where
    Json<NewComment>: FromRequest<S, B, Rejection = JsonRejection>,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = Error;

    async fn from_request(req: Request<B>, state: &S) -> Result<CommentBody, Error> {
        match Json::<NewComment>::from_request(req, state).await {
            Ok(Json(new)) => Ok(CommentBody(new)),
            Err(JsonRejection::MissingJsonContentType(_)) => Err(Error::empty_content()),
            Err(rejection) => Err(Error::malformed_body(rejection.body_text())),
        }
    }
}
