pub async fn index() -> &'static str {
    "aihive dispatcher"
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::handlers::router;
    use crate::test_support::test_state;

    #[tokio::test]
    async fn index_responds_ok() {
        let state = test_state().await;
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"aihive dispatcher");
    }
}
