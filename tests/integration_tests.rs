//! Integration tests for the docchat library.
//! The scripted tests run everywhere; the live tests require a backend and
//! credentials in the environment.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::broadcast;

    use docchat::store::MemoryStore;
    use docchat::testing::{ScriptedStream, ScriptedTransport};
    use docchat::transport::{ApiResponse, Method};
    use docchat::{
        ApiClient, ChatMode, ClientConfig, Conversation, Error, SessionEvent, SessionManager,
        StreamState,
    };

    fn backend() -> Arc<ScriptedTransport> {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on(Method::Post, "auth/login", |_, _| {
            Ok(ApiResponse::json_body(
                200,
                &json!({"access_token": "a1", "refresh_token": "r1", "token_type": "bearer"}),
            ))
        });
        transport.on(Method::Get, "auth/me", |_, bearer| {
            if bearer.is_none() {
                return Ok(ApiResponse::json_body(401, &json!({"detail": "Not authenticated"})));
            }
            Ok(ApiResponse::json_body(
                200,
                &json!({"id": "u1", "email": "ada@example.com", "full_name": "Ada"}),
            ))
        });
        let issued = Arc::new(AtomicUsize::new(1));
        transport.on(Method::Post, "auth/refresh", move |_, _| {
            let n = issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ApiResponse::json_body(200, &json!({"access_token": format!("a{n}")})))
        });
        transport.on(Method::Post, "auth/logout", |_, _| {
            Ok(ApiResponse::json_body(200, &json!({"message": "Logged out"})))
        });
        transport
    }

    fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[tokio::test]
    async fn test_login_browse_chat_logout() {
        let transport = backend();
        // The first access token is rejected by the contexts endpoint.
        transport.on(Method::Get, "contexts/", |_, bearer| {
            if bearer == Some("a1") {
                return Ok(ApiResponse::json_body(401, &json!({"detail": "Token expired"})));
            }
            Ok(ApiResponse::json_body(
                200,
                &json!([{
                    "id": "c1",
                    "name": "Papers",
                    "created_at": "2024-05-01T09:00:00Z",
                    "user_id": "u1",
                    "document_count": 2
                }]),
            ))
        });
        // The stream refuses the second token once.
        transport.push_stream(ScriptedStream::Refuse(Error::authentication(
            "Could not validate credentials",
        )));
        transport.push_stream(ScriptedStream::events(&[
            r#"{"response":"Section 3 covers "}"#,
            r#"{"response":"the results."}"#,
            r#"{"sources":[{"filename":"paper.pdf","content_preview":"Results"}]}"#,
            "[DONE]",
        ]));

        let session = SessionManager::new(transport.clone(), Arc::new(MemoryStore::new()));
        let mut events = session.subscribe();
        let client = ApiClient::new(session.clone());

        let user = session
            .login_with_password("ada@example.com", "hunter2")
            .await
            .expect("login should succeed");
        assert_eq!(user.display_name(), "Ada");

        let contexts = client.list_contexts().await.expect("contexts after refresh");
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].document_count, 2);
        assert_eq!(session.access_token().as_deref(), Some("a2"));

        let mut conversation = Conversation::new(contexts[0].id.clone(), client.clone());
        let mut answer = String::new();
        let mut observer = docchat::Callbacks::new().on_chunk(|chunk| answer.push_str(chunk));
        let stream = conversation
            .send("What is section 3 about?", ChatMode::Standard, &mut observer)
            .await
            .expect("message is valid");
        drop(observer);
        assert_eq!(stream.state, StreamState::Done);
        assert!(stream.retry_used);
        assert_eq!(answer, "Section 3 covers the results.");
        assert_eq!(conversation.messages().len(), 2);
        let urls = transport.stream_urls();
        assert_eq!(urls.len(), 2);
        assert!(urls[1].query_pairs().any(|(k, v)| k == "token" && v == "a3"));

        session.logout().await;
        assert!(!session.is_authenticated());
        assert_eq!(transport.count(Method::Post, "auth/logout"), 1);
        assert_eq!(transport.count(Method::Post, "auth/refresh"), 2);

        let seen = drain(&mut events);
        assert!(matches!(seen.first(), Some(SessionEvent::LoggedIn(u)) if u.id == "u1"));
        assert_eq!(
            seen[1..].to_vec(),
            vec![
                SessionEvent::Refreshed,
                SessionEvent::Refreshed,
                SessionEvent::LoggedOut
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_refresh_requires_login() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on(Method::Get, "auth/me", |_, _| {
            Ok(ApiResponse::json_body(200, &json!({"id": "u1", "email": "ada@example.com"})))
        });
        transport.on(Method::Get, "contexts/", |_, _| {
            Ok(ApiResponse::json_body(401, &json!({"detail": "Token expired"})))
        });
        transport.on(Method::Post, "auth/refresh", |_, _| {
            Ok(ApiResponse::json_body(401, &json!({"detail": "Invalid refresh token"})))
        });

        let session = SessionManager::new(transport.clone(), Arc::new(MemoryStore::new()));
        session.login("a1", Some("r1".to_string())).await.unwrap();
        let mut events = session.subscribe();
        let client = ApiClient::new(session.clone());

        let err = client.list_contexts().await.unwrap_err();
        assert!(err.is_authentication());
        assert!(!session.is_authenticated());
        assert_eq!(transport.count(Method::Get, "contexts/"), 1);
        assert_eq!(drain(&mut events), vec![SessionEvent::LoginRequired]);
    }

    #[tokio::test]
    async fn test_persisted_session_is_restored() {
        let transport = backend();
        let store = Arc::new(MemoryStore::new());

        let first = SessionManager::new(transport.clone(), store.clone());
        first.login("a1", Some("r1".to_string())).await.unwrap();
        assert_eq!(store.snapshot().refresh_token.as_deref(), Some("r1"));

        let second = SessionManager::new(transport.clone(), store);
        let user = second.init().await.unwrap().expect("session restored");
        assert_eq!(user.id, "u1");
        assert!(second.is_authenticated());
        assert_eq!(transport.count(Method::Post, "auth/refresh"), 1);
    }

    #[tokio::test]
    async fn test_live_backend_chat() {
        // Requires DOCCHAT_API_URL, DOCCHAT_EMAIL, DOCCHAT_PASSWORD and DOCCHAT_CONTEXT.
        let vars = ["DOCCHAT_EMAIL", "DOCCHAT_PASSWORD", "DOCCHAT_CONTEXT"]
            .map(|name| std::env::var(name).ok());
        let [Some(email), Some(password), Some(context_id)] = vars else {
            eprintln!("Skipping test: DOCCHAT_EMAIL, DOCCHAT_PASSWORD or DOCCHAT_CONTEXT not set");
            return;
        };

        let config = ClientConfig::default()
            .apply_env()
            .expect("DOCCHAT_API_URL should be a valid URL");
        let client = ApiClient::from_config(&config).expect("Failed to create client");
        client
            .session()
            .login_with_password(&email, &password)
            .await
            .expect("login should succeed with valid credentials");

        let mut conversation = Conversation::new(context_id, client.clone());
        let stream = conversation
            .send(
                "Summarize these documents in one sentence.",
                ChatMode::Standard,
                &mut docchat::Callbacks::new(),
            )
            .await
            .expect("message is valid");
        assert_eq!(stream.state, StreamState::Done, "{:?}", stream.error);
        assert!(!conversation.messages()[1].content.is_empty());

        client.session().logout().await;
    }
}
