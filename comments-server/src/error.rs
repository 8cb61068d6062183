use comments_api::Error as ApiError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn empty_content() -> Error {
        Error::Api(ApiError::EmptyContent)
    }

    pub fn malformed_body(details: String) -> Error {
        Error::Api(ApiError::MalformedBody(details))
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            Error::Anyhow(err) => {
                tracing::error!(?err, "internal server error");
                #[cfg(not(test))]
                let err =
                    ApiError::Unknown(String::from("Internal server error, see logs for details"));
                #[cfg(test)]
                let err = ApiError::Unknown(format!("Internal server error: {err:?}"));
                err
            }
            Error::Api(err) => {
                tracing::info!("returning error to client: {err}");
                err
            }
        };
        (
            err.status_code(),
            [(
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderValue::from_static("application/json"),
            )],
            err.contents(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, response::IntoResponse};
    use comments_api::Error as ApiError;

    use super::*;

    async fn status_and_error(err: Error) -> (StatusCode, ApiError) {
        let resp = err.into_response();
        let status = resp.status();
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        (status, ApiError::parse(&body).unwrap())
    }

    #[tokio::test]
    async fn internal_errors_are_500_with_details_in_tests() {
        let (status, err) =
            status_and_error(Error::from(anyhow::anyhow!("comment store poisoned"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        match err {
            ApiError::Unknown(msg) => assert!(msg.contains("comment store poisoned"), "{msg}"),
            e => panic!("expected an unknown error, got {e:?}"),
        }
    }

    #[tokio::test]
    async fn api_errors_keep_their_status() {
        let (status, err) = status_and_error(Error::empty_content()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err, ApiError::EmptyContent);
        let (status, err) = status_and_error(Error::malformed_body(String::from("eof"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err, ApiError::MalformedBody(String::from("eof")));
    }
}
