//! # Shutdown Scenarios
//!
//! Cooperative shutdown and connection loss:
//!
//! 1. An idle serve loop stops promptly after `shutdown()`
//! 2. A shutdown requested mid-request lets the in-flight delivery
//!    finish; the caller still gets its reply
//! 3. Losing the reply queue fails pending calls with `ConnectionLost`
//!    instead of letting them wait out their full timeouts

#[cfg(test)]
mod tests {
    use crate::init_tracing;
    use async_trait::async_trait;
    use courier_broker::{ChannelProvider, InMemoryBroker};
    use courier_messages::{queues, UserExistence};
    use courier_rpc::{
        CallError, ClientConfig, HandlerError, RequestHandler, RpcClient, RpcServer,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use uuid::Uuid;

    struct SlowHandler {
        delay: Duration,
    }

    #[async_trait]
    impl RequestHandler for SlowHandler {
        type Request = UserExistence;
        type Response = UserExistence;

        async fn handle(&self, request: UserExistence) -> Result<UserExistence, HandlerError> {
            tokio::time::sleep(self.delay).await;
            Ok(UserExistence::confirmed(request.user_id, true))
        }
    }

    async fn connect_client(broker: &InMemoryBroker) -> RpcClient {
        let provider = ChannelProvider::new(Arc::new(broker.clone()));
        RpcClient::connect(&provider, ClientConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_idle_server_stops_after_shutdown() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let provider = ChannelProvider::new(Arc::new(broker.clone()));
        let server = RpcServer::bind(
            &provider,
            SlowHandler {
                delay: Duration::ZERO,
            },
        )
        .await
        .unwrap();
        let handle = server.handle();
        let serving = tokio::spawn(async move { server.serve(queues::CHECK_EXISTENCE).await });

        // Let the loop reach its idle recv before signalling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown();

        let result = timeout(Duration::from_secs(1), serving).await.unwrap();
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_in_flight_request_completes_before_stop() {
        init_tracing();
        let broker = InMemoryBroker::new();
        let provider = ChannelProvider::new(Arc::new(broker.clone()));
        let server = RpcServer::bind(
            &provider,
            SlowHandler {
                delay: Duration::from_millis(100),
            },
        )
        .await
        .unwrap();
        let handle = server.handle();
        let serving = tokio::spawn(async move { server.serve(queues::CHECK_EXISTENCE).await });

        let client = Arc::new(connect_client(&broker).await);
        let user_id = Uuid::new_v4();
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move {
                client
                    .call::<UserExistence, UserExistence>(
                        queues::CHECK_EXISTENCE,
                        &UserExistence::query(user_id),
                    )
                    .await
            }
        });

        // The handler is mid-flight when shutdown arrives.
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown();

        // The in-flight request still completes and is answered.
        let reply = timeout(Duration::from_secs(1), call)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(reply.is_exists);

        let result = timeout(Duration::from_secs(1), serving).await.unwrap();
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_lost_reply_queue_fails_pending_calls() {
        init_tracing();
        let broker = InMemoryBroker::new();
        // No server consumes the queue; the call would pend for its full
        // two seconds if nothing failed it early.
        let client = Arc::new(connect_client(&broker).await);
        let reply_queue = client.reply_queue().to_string();

        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move {
                client
                    .call_with_timeout::<UserExistence, UserExistence>(
                        queues::CHECK_EXISTENCE,
                        &UserExistence::query(Uuid::new_v4()),
                        Duration::from_secs(2),
                    )
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.delete_queue(&reply_queue);

        // ConnectionLost arrives well before the call's own deadline.
        let result = timeout(Duration::from_millis(500), call)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(CallError::ConnectionLost)));
    }
}
