//! # The Existence Flow
//!
//! The original service exchange in miniature, all in one process: an
//! auth service answers user-existence checks from its directory, a task
//! service answers per-user task counts, and an email service consumes
//! one-way notifications. Each server runs its handler inside a unit of
//! work standing in for a database transaction.

#[cfg(test)]
mod tests {
    use crate::init_tracing;
    use async_trait::async_trait;
    use courier_broker::{Channel, ChannelProvider, Connector, InMemoryBroker};
    use courier_messages::{queues, EmailNotification, TasksCount, UserExistence};
    use courier_rpc::{
        ClientConfig, Envelope, HandlerError, RequestHandler, RpcClient, RpcServer, ServerHandle,
        UnitOfWork, UnitOfWorkError,
    };
    use parking_lot::RwLock;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    /// In-process stand-in for the auth service's user store.
    #[derive(Default)]
    struct UserDirectory {
        users: RwLock<HashSet<Uuid>>,
    }

    impl UserDirectory {
        fn insert(&self, user_id: Uuid) {
            self.users.write().insert(user_id);
        }

        fn contains(&self, user_id: &Uuid) -> bool {
            self.users.read().contains(user_id)
        }
    }

    struct ExistenceHandler {
        directory: Arc<UserDirectory>,
    }

    #[async_trait]
    impl RequestHandler for ExistenceHandler {
        type Request = UserExistence;
        type Response = UserExistence;

        async fn handle(&self, request: UserExistence) -> Result<UserExistence, HandlerError> {
            Ok(UserExistence::confirmed(
                request.user_id,
                self.directory.contains(&request.user_id),
            ))
        }
    }

    /// In-process stand-in for the task service's store:
    /// user id to (authored, assigned).
    #[derive(Default)]
    struct TaskBook {
        counts: RwLock<HashMap<Uuid, (u64, u64)>>,
    }

    struct TasksCountHandler {
        book: Arc<TaskBook>,
    }

    #[async_trait]
    impl RequestHandler for TasksCountHandler {
        type Request = TasksCount;
        type Response = TasksCount;

        async fn handle(&self, request: TasksCount) -> Result<TasksCount, HandlerError> {
            let (authored, assigned) = self
                .book
                .counts
                .read()
                .get(&request.user_id)
                .copied()
                .unwrap_or((0, 0));
            Ok(TasksCount {
                user_id: request.user_id,
                count_authored_tasks: authored,
                count_assigned_tasks: assigned,
            })
        }
    }

    /// Counts transaction transitions, standing in for a database
    /// session.
    #[derive(Default)]
    struct CountingUow {
        begun: AtomicUsize,
        committed: AtomicUsize,
        rolled_back: AtomicUsize,
    }

    #[async_trait]
    impl UnitOfWork for CountingUow {
        async fn begin(&self) -> Result<(), UnitOfWorkError> {
            self.begun.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn commit(&self) -> Result<(), UnitOfWorkError> {
            self.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&self) -> Result<(), UnitOfWorkError> {
            self.rolled_back.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn connect_client(broker: &InMemoryBroker) -> RpcClient {
        let provider = ChannelProvider::new(Arc::new(broker.clone()));
        RpcClient::connect(&provider, ClientConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_existence_check_end_to_end() {
        init_tracing();
        let broker = InMemoryBroker::new();

        let directory = Arc::new(UserDirectory::default());
        let registered = Uuid::new_v4();
        directory.insert(registered);

        let uow = Arc::new(CountingUow::default());
        let provider = ChannelProvider::new(Arc::new(broker.clone()));
        let server = RpcServer::bind(
            &provider,
            ExistenceHandler {
                directory: Arc::clone(&directory),
            },
        )
        .await
        .unwrap()
        .with_unit_of_work(uow.clone());
        let handle = server.handle();
        tokio::spawn(async move { server.serve(queues::CHECK_EXISTENCE).await });

        let client = connect_client(&broker).await;

        // A registered user exists.
        let reply: UserExistence = client
            .call(queues::CHECK_EXISTENCE, &UserExistence::query(registered))
            .await
            .unwrap();
        assert_eq!(reply.user_id, registered);
        assert!(reply.is_exists);

        // An unknown user does not; same wire shape, different answer.
        let stranger = Uuid::new_v4();
        let reply: UserExistence = client
            .call(queues::CHECK_EXISTENCE, &UserExistence::query(stranger))
            .await
            .unwrap();
        assert_eq!(reply.user_id, stranger);
        assert!(!reply.is_exists);

        // Every request ran inside a committed transaction.
        assert_eq!(uow.begun.load(Ordering::SeqCst), 2);
        assert_eq!(uow.committed.load(Ordering::SeqCst), 2);
        assert_eq!(uow.rolled_back.load(Ordering::SeqCst), 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_tasks_count_exchange() {
        init_tracing();
        let broker = InMemoryBroker::new();

        let book = Arc::new(TaskBook::default());
        let busy_user = Uuid::new_v4();
        book.counts.write().insert(busy_user, (7, 3));

        let provider = ChannelProvider::new(Arc::new(broker.clone()));
        let server = RpcServer::bind(
            &provider,
            TasksCountHandler {
                book: Arc::clone(&book),
            },
        )
        .await
        .unwrap();
        let handle = server.handle();
        tokio::spawn(async move { server.serve(queues::TASKS_COUNT).await });

        let client = connect_client(&broker).await;

        let reply: TasksCount = client
            .call(queues::TASKS_COUNT, &TasksCount::query(busy_user))
            .await
            .unwrap();
        assert_eq!(reply.count_authored_tasks, 7);
        assert_eq!(reply.count_assigned_tasks, 3);

        // A user with no tasks gets zeroes, not an error.
        let reply: TasksCount = client
            .call(queues::TASKS_COUNT, &TasksCount::query(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(reply.count_authored_tasks, 0);
        assert_eq!(reply.count_assigned_tasks, 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_email_notification_is_one_way() {
        init_tracing();
        let broker = InMemoryBroker::new();

        // The email service consumes its queue directly; nothing ever
        // travels back.
        let channel = broker.connect().await.unwrap();
        channel
            .declare_queue(queues::EMAIL_NOTIFICATIONS)
            .await
            .unwrap();
        let mut inbox = channel.consume(queues::EMAIL_NOTIFICATIONS).await.unwrap();

        let client = connect_client(&broker).await;
        client
            .notify(
                queues::EMAIL_NOTIFICATIONS,
                &EmailNotification {
                    email_to: "new.user@example.com".to_string(),
                    email_from: "noreply@example.com".to_string(),
                    subject: "Registration".to_string(),
                    message: "You have successfully registered".to_string(),
                },
            )
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        let envelope = Envelope::from_bytes(delivery.payload()).unwrap();
        assert_eq!(envelope.kind, "email_notifications");
        assert!(!envelope.expects_reply());

        let email: EmailNotification = envelope.decode_payload().unwrap();
        assert_eq!(email.email_to, "new.user@example.com");
        assert_eq!(email.subject, "Registration");
        delivery.ack();

        // Fire-and-forget: nothing pending on the client.
        assert_eq!(client.pending_count(), 0);
    }
}
