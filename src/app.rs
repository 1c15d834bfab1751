//! Router assembly shared by the binary and the request-level tests.

use axum::extract::Extension;
use axum::routing::any;
use axum::{Router, middleware};
use std::sync::Arc;

use crate::auth::{SharedCredentials, auth_middleware};
use crate::dav::dav_handler;
use crate::http::add_dav_headers;
use crate::storage::Storage;

/// Builds the DAV router. Layers run outermost-first: header decoration,
/// then authentication, then dispatch.
pub fn build_router(storage: Arc<Storage>, credentials: SharedCredentials) -> Router {
    Router::new()
        .route("/", any(dav_handler))
        .route("/{*path}", any(dav_handler))
        .layer(middleware::from_fn(auth_middleware))
        .layer(middleware::from_fn(add_dav_headers))
        .layer(Extension(storage))
        .layer(Extension(credentials))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use axum::response::Response;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use http_body_util::BodyExt;
    use std::path::Path;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::auth::StaticCredentials;
    use crate::transfer::tests::CrossDeviceRename;

    const USER: &str = "tester";
    const PASS: &str = "secret";

    struct TestServer {
        temp: TempDir,
        router: Router,
    }

    impl TestServer {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let storage = Storage::new(temp.path().to_path_buf());
            Self::with_storage(temp, storage)
        }

        fn cross_device() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let storage = Storage::with_renamer(
                temp.path().to_path_buf(),
                Arc::new(CrossDeviceRename::default()),
            );
            Self::with_storage(temp, storage)
        }

        fn with_storage(temp: TempDir, storage: Storage) -> Self {
            let credentials: SharedCredentials = Arc::new(StaticCredentials::new(USER, PASS));
            let router = build_router(Arc::new(storage), credentials);
            Self { temp, router }
        }

        fn root(&self) -> &Path {
            self.temp.path()
        }

        fn request(&self, method: &str, uri: &str) -> axum::http::request::Builder {
            let token = STANDARD.encode(format!("{USER}:{PASS}"));
            Request::builder()
                .method(Method::from_bytes(method.as_bytes()).expect("method"))
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Basic {token}"))
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.router
                .clone()
                .oneshot(request)
                .await
                .expect("infallible")
        }

        async fn call(&self, method: &str, uri: &str) -> Response {
            self.send(self.request(method, uri).body(Body::empty()).expect("request"))
                .await
        }

        async fn put(&self, uri: &str, content: &'static [u8]) -> Response {
            self.send(self.request("PUT", uri).body(Body::from(content)).expect("request"))
                .await
        }

        async fn propfind(&self, uri: &str, depth: Option<&str>) -> Response {
            let mut builder = self.request("PROPFIND", uri);
            if let Some(depth) = depth {
                builder = builder.header("Depth", depth);
            }
            self.send(builder.body(Body::empty()).expect("request")).await
        }

        async fn transfer(
            &self,
            method: &str,
            from: &str,
            to: &str,
            overwrite: Option<&str>,
        ) -> Response {
            let mut builder = self
                .request(method, from)
                .header("Destination", format!("http://localhost{to}"));
            if let Some(overwrite) = overwrite {
                builder = builder.header("Overwrite", overwrite);
            }
            self.send(builder.body(Body::empty()).expect("request")).await
        }
    }

    async fn body_string(response: Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    fn response_count(xml: &str) -> usize {
        xml.matches("<D:response>").count()
    }

    #[tokio::test]
    async fn options_is_answered_without_credentials() {
        let server = TestServer::new();
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/anything")
            .body(Body::empty())
            .expect("request");
        let response = server.send(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["dav"], "1, 2");
        let allow = response.headers()[header::ALLOW].to_str().expect("allow");
        for verb in ["PROPFIND", "MKCOL", "COPY", "MOVE", "LOCK", "UNLOCK"] {
            assert!(allow.contains(verb), "{verb} missing from {allow}");
        }
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn every_other_verb_requires_credentials() {
        let server = TestServer::new();
        for verb in [
            "GET", "HEAD", "PUT", "DELETE", "PROPFIND", "MKCOL", "COPY", "MOVE", "LOCK", "UNLOCK",
            "BREW",
        ] {
            let request = Request::builder()
                .method(Method::from_bytes(verb.as_bytes()).expect("method"))
                .uri("/file.txt")
                .body(Body::empty())
                .expect("request");
            let response = server.send(request).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{verb}");
            assert_eq!(
                response.headers()[header::WWW_AUTHENTICATE],
                r#"Basic realm="WebDAV""#
            );
            assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        }
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let server = TestServer::new();
        let token = STANDARD.encode(format!("{USER}:wrong"));
        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header(header::AUTHORIZATION, format!("Basic {token}"))
            .body(Body::empty())
            .expect("request");
        assert_eq!(server.send(request).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_verb_is_method_not_allowed() {
        let server = TestServer::new();
        let response = server.call("PROPPATCH", "/").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn put_creates_missing_parents() {
        let server = TestServer::new();
        let response = server.put("/deep/er/file.txt", b"payload").await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().contains_key(header::ETAG));
        assert_eq!(
            std::fs::read(server.root().join("deep/er/file.txt")).expect("read"),
            b"payload"
        );

        let replaced = server.put("/deep/er/file.txt", b"again").await;
        assert_eq!(replaced.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            std::fs::read(server.root().join("deep/er/file.txt")).expect("read"),
            b"again"
        );
    }

    #[tokio::test]
    async fn put_onto_directory_is_rejected() {
        let server = TestServer::new();
        std::fs::create_dir(server.root().join("dir")).expect("mkdir");
        let response = server.put("/dir", b"x").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn get_and_head_serve_file_with_validators() {
        let server = TestServer::new();
        std::fs::write(server.root().join("notes.txt"), b"hello world").expect("write");

        let response = server.call("GET", "/notes.txt").await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(headers[header::CONTENT_LENGTH], "11");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert!(headers.contains_key(header::ETAG));
        assert!(headers.contains_key(header::LAST_MODIFIED));
        assert_eq!(body_string(response).await, "hello world");

        let head = server.call("HEAD", "/notes.txt").await;
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(head.headers()[header::ETAG], headers[header::ETAG]);
        assert_eq!(body_string(head).await, "");
    }

    #[tokio::test]
    async fn get_directory_or_missing_file() {
        let server = TestServer::new();
        std::fs::create_dir(server.root().join("dir")).expect("mkdir");
        assert_eq!(
            server.call("GET", "/dir").await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            server.call("GET", "/missing.txt").await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn traversal_in_url_stays_inside_root() {
        let server = TestServer::new();
        std::fs::write(server.root().join("passwd"), b"inside").expect("write");

        let response = server.call("GET", "/../../passwd").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "inside");

        let response = server.call("GET", "/%2e%2e/%2e%2e/passwd").await;
        assert_eq!(body_string(response).await, "inside");
    }

    #[tokio::test]
    async fn malformed_encoding_is_bad_request() {
        let server = TestServer::new();
        let response = server.call("GET", "/%ff%fe").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn propfind_depth_zero_and_one() {
        let server = TestServer::new();
        std::fs::create_dir_all(server.root().join("dir/sub")).expect("mkdir");
        std::fs::write(server.root().join("dir/one.txt"), b"1").expect("write");
        std::fs::write(server.root().join("dir/two.txt"), b"22").expect("write");

        let response = server.propfind("/dir", Some("0")).await;
        assert_eq!(response.status(), StatusCode::MULTI_STATUS);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/xml; charset=utf-8"
        );
        assert_eq!(response_count(&body_string(response).await), 1);

        let response = server.propfind("/dir", Some("1")).await;
        assert_eq!(response_count(&body_string(response).await), 4);

        let response = server.propfind("/dir", None).await;
        assert_eq!(response_count(&body_string(response).await), 4);
    }

    #[tokio::test]
    async fn propfind_missing_resource_has_no_body() {
        let server = TestServer::new();
        let response = server.propfind("/ghost", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!body_string(response).await.contains("multistatus"));
    }

    #[tokio::test]
    async fn etag_is_stable_until_file_changes() {
        let server = TestServer::new();
        server.put("/tracked.txt", b"one").await;

        let first = body_string(server.propfind("/tracked.txt", Some("0")).await).await;
        let second = body_string(server.propfind("/tracked.txt", Some("0")).await).await;
        assert_eq!(first, second);

        server.put("/tracked.txt", b"longer content").await;
        let third = body_string(server.propfind("/tracked.txt", Some("0")).await).await;
        assert_ne!(first, third);
        assert!(third.contains("<D:getcontentlength>14</D:getcontentlength>"));
    }

    #[tokio::test]
    async fn mkcol_and_delete() {
        let server = TestServer::new();
        assert_eq!(server.call("MKCOL", "/fresh").await.status(), StatusCode::CREATED);
        assert!(server.root().join("fresh").is_dir());
        assert_eq!(
            server.call("MKCOL", "/fresh").await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );

        std::fs::write(server.root().join("fresh/inner.txt"), b"x").expect("write");
        assert_eq!(
            server.call("DELETE", "/fresh").await.status(),
            StatusCode::NO_CONTENT
        );
        assert!(!server.root().join("fresh").exists());
        assert_eq!(
            server.call("DELETE", "/fresh").await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn delete_refuses_storage_root() {
        let server = TestServer::new();
        assert_eq!(
            server.call("DELETE", "/").await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert!(server.root().exists());
    }

    #[tokio::test]
    async fn lock_issues_advisory_token_and_unlock_succeeds() {
        let server = TestServer::new();
        let response = server.call("LOCK", "/doc.txt").await;
        assert_eq!(response.status(), StatusCode::OK);
        let token_header = response.headers()["lock-token"]
            .to_str()
            .expect("token")
            .to_string();
        assert!(token_header.starts_with("<opaquelocktoken:"));
        let body = body_string(response).await;
        assert!(body.contains("<D:lockdiscovery>"));
        assert!(body.contains(token_header.trim_matches(['<', '>'])));

        // The token is not enforced: writes without it still succeed.
        assert_eq!(server.put("/doc.txt", b"free").await.status(), StatusCode::CREATED);
        assert_eq!(
            server.call("UNLOCK", "/doc.txt").await.status(),
            StatusCode::NO_CONTENT
        );
    }

    #[tokio::test]
    async fn copy_then_get_is_byte_identical() {
        let server = TestServer::new();
        let original: &'static [u8] = &[0, 159, 146, 150, 10, 13, 255];
        server.put("/bin.dat", original).await;

        let response = server.transfer("COPY", "/bin.dat", "/copies/bin.dat", None).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = server.call("GET", "/copies/bin.dat").await;
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(bytes.as_ref(), original);
        assert!(server.root().join("bin.dat").exists());
    }

    #[tokio::test]
    async fn copy_without_destination_is_bad_request() {
        let server = TestServer::new();
        server.put("/a.txt", b"a").await;
        assert_eq!(
            server.call("COPY", "/a.txt").await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            server.transfer("MOVE", "/missing", "/b", None).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn move_without_overwrite_leaves_both_untouched() {
        let server = TestServer::new();
        server.put("/src.txt", b"source").await;
        server.put("/dst.txt", b"destination").await;

        let response = server.transfer("MOVE", "/src.txt", "/dst.txt", Some("F")).await;
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(std::fs::read(server.root().join("src.txt")).expect("src"), b"source");
        assert_eq!(
            std::fs::read(server.root().join("dst.txt")).expect("dst"),
            b"destination"
        );

        let response = server.transfer("MOVE", "/src.txt", "/dst.txt", Some("t")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(std::fs::read(server.root().join("dst.txt")).expect("dst"), b"source");
        assert!(!server.root().join("src.txt").exists());
    }

    #[tokio::test]
    async fn move_directory_across_devices() {
        let server = TestServer::cross_device();
        server.put("/tree/a.txt", b"a").await;
        server.put("/tree/nested/b.txt", b"b").await;
        server.call("MKCOL", "/tree/empty").await;

        let response = server.transfer("MOVE", "/tree", "/elsewhere/tree", None).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let moved = server.root().join("elsewhere/tree");
        assert_eq!(std::fs::read(moved.join("a.txt")).expect("a"), b"a");
        assert_eq!(std::fs::read(moved.join("nested/b.txt")).expect("b"), b"b");
        assert!(moved.join("empty").is_dir());
        assert!(!server.root().join("tree").exists());
    }

    #[tokio::test]
    async fn listing_then_move_scenario() {
        let server = TestServer::new();
        std::fs::create_dir(server.root().join("a")).expect("mkdir");
        std::fs::write(server.root().join("a/b.txt"), b"hi").expect("write");

        let response = server.propfind("/a", Some("1")).await;
        assert_eq!(response.status(), StatusCode::MULTI_STATUS);
        let xml = body_string(response).await;
        assert_eq!(response_count(&xml), 2);
        assert!(xml.contains("<D:href>/a</D:href>"));
        assert!(xml.contains("<D:href>/a/b.txt</D:href>"));
        assert!(xml.contains("D:collection"));
        assert!(xml.contains("<D:getcontentlength>2</D:getcontentlength>"));

        let response = server.transfer("MOVE", "/a", "/c", None).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = server.call("GET", "/c/b.txt").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "hi");
        assert_eq!(
            server.call("GET", "/a/b.txt").await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
