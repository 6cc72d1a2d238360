/// Integration tests for direct messages and derived conversations:
/// inbox listing, read-on-view, and one-way read transitions.
use castline_core::db::Page;
use castline_core::error::CoreError;
use castline_core::messages::{ConversationAggregator, MessageStore};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

async fn setup_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    pool
}

async fn create_user(pool: &SqlitePool, name: &str) -> i64 {
    sqlx::query("INSERT INTO user_account (display_name, email, created_at) VALUES (?1, ?2, ?3)")
        .bind(name)
        .bind(format!("{}@example.com", name.to_lowercase()))
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

/// Insert a message with a controlled timestamp, bypassing the store
async fn send_at(
    pool: &SqlitePool,
    sender_id: i64,
    recipient_id: i64,
    content: &str,
    created_at: DateTime<Utc>,
) -> i64 {
    sqlx::query(
        "INSERT INTO message (sender_id, recipient_id, content, is_read, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
    )
    .bind(sender_id)
    .bind(recipient_id)
    .bind(content)
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

#[tokio::test]
async fn test_send_message_and_unread_flow() {
    let pool = setup_pool().await;
    let store = MessageStore::new(pool.clone());
    let aggregator = ConversationAggregator::new(pool.clone());
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let message = store.send_message(alice, bob, "hello").await.unwrap();
    assert!(!message.is_read);
    assert!(message.read_at.is_none());

    assert_eq!(store.unread_total(bob).await.unwrap(), 1);
    assert_eq!(store.unread_total(alice).await.unwrap(), 0);

    let inbox = aggregator
        .list_conversations(bob, Page::default())
        .await
        .unwrap();
    assert_eq!(inbox.total, 1);
    assert_eq!(inbox.items[0].counterpart_id, alice);
    assert_eq!(inbox.items[0].unread_count, 1);
    assert_eq!(inbox.items[0].last_message.content, "hello");

    // Viewing the conversation marks the page read
    let page = aggregator
        .get_conversation(bob, alice, Page::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert!(page.messages[0].is_read);
    assert!(page.messages[0].read_at.is_some());

    assert_eq!(store.unread_total(bob).await.unwrap(), 0);
    let inbox = aggregator
        .list_conversations(bob, Page::default())
        .await
        .unwrap();
    assert_eq!(inbox.items[0].unread_count, 0);
}

#[tokio::test]
async fn test_send_message_validations() {
    let pool = setup_pool().await;
    let store = MessageStore::new(pool.clone());
    let alice = create_user(&pool, "Alice").await;

    let err = store.send_message(alice, alice, "hi").await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let bob = create_user(&pool, "Bob").await;
    let err = store.send_message(alice, bob, "  ").await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let err = store.send_message(alice, 9999, "hi").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));

    let too_long = "x".repeat(4001);
    let err = store.send_message(alice, bob, &too_long).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn test_conversation_listing_orders_by_latest_activity() {
    let pool = setup_pool().await;
    let aggregator = ConversationAggregator::new(pool.clone());
    let me = create_user(&pool, "Me").await;
    let a = create_user(&pool, "A").await;
    let b = create_user(&pool, "B").await;

    let base = Utc::now();
    send_at(&pool, a, me, "from a, early", base - Duration::minutes(30)).await;
    send_at(&pool, me, a, "to a, mid", base - Duration::minutes(20)).await;
    send_at(&pool, b, me, "from b, late", base - Duration::minutes(10)).await;

    let inbox = aggregator
        .list_conversations(me, Page::default())
        .await
        .unwrap();
    assert_eq!(inbox.total, 2);
    // B spoke last, so B's conversation leads
    assert_eq!(inbox.items[0].counterpart_id, b);
    assert_eq!(inbox.items[0].last_message.content, "from b, late");
    assert_eq!(inbox.items[1].counterpart_id, a);
    // The latest message of the A pair is the one I sent
    assert_eq!(inbox.items[1].last_message.content, "to a, mid");
    assert_eq!(inbox.items[1].unread_count, 1);
}

#[tokio::test]
async fn test_equal_timestamps_break_toward_higher_id() {
    let pool = setup_pool().await;
    let aggregator = ConversationAggregator::new(pool.clone());
    let me = create_user(&pool, "Me").await;
    let a = create_user(&pool, "A").await;

    let at = Utc::now();
    let first = send_at(&pool, a, me, "first insert", at).await;
    let second = send_at(&pool, a, me, "second insert", at).await;
    assert!(second > first);

    let inbox = aggregator
        .list_conversations(me, Page::default())
        .await
        .unwrap();
    assert_eq!(inbox.items[0].last_message.id, second);

    let page = aggregator
        .get_conversation(me, a, Page::default())
        .await
        .unwrap();
    assert_eq!(page.messages[0].id, second);
    assert_eq!(page.messages[1].id, first);
}

#[tokio::test]
async fn test_read_on_view_is_scoped_to_the_fetched_page() {
    let pool = setup_pool().await;
    let store = MessageStore::new(pool.clone());
    let aggregator = ConversationAggregator::new(pool.clone());
    let me = create_user(&pool, "Me").await;
    let a = create_user(&pool, "A").await;

    let base = Utc::now();
    let oldest = send_at(&pool, a, me, "one", base - Duration::minutes(3)).await;
    send_at(&pool, a, me, "two", base - Duration::minutes(2)).await;
    send_at(&pool, a, me, "three", base - Duration::minutes(1)).await;

    // Page size 2 fetches the two newest; the oldest stays unread
    let page = aggregator
        .get_conversation(me, a, Page::new(1, 2))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.messages.len(), 2);
    assert!(page.messages.iter().all(|m| m.is_read));

    assert_eq!(store.unread_total(me).await.unwrap(), 1);
    let still_unread: bool =
        sqlx::query_scalar("SELECT is_read = 0 FROM message WHERE id = ?1")
            .bind(oldest)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(still_unread);

    // Messages I sent are never flipped by my own viewing
    send_at(&pool, me, a, "mine", base).await;
    aggregator
        .get_conversation(me, a, Page::default())
        .await
        .unwrap();
    assert_eq!(store.unread_total(a).await.unwrap(), 1);
}

#[tokio::test]
async fn test_get_conversation_with_unknown_counterpart_is_not_found() {
    let pool = setup_pool().await;
    let aggregator = ConversationAggregator::new(pool.clone());
    let me = create_user(&pool, "Me").await;

    let err = aggregator
        .get_conversation(me, 9999, Page::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn test_mark_as_read_is_recipient_only_and_one_way() {
    let pool = setup_pool().await;
    let store = MessageStore::new(pool.clone());
    let aggregator = ConversationAggregator::new(pool.clone());
    let alice = create_user(&pool, "Alice").await;
    let bob = create_user(&pool, "Bob").await;

    let message = store.send_message(alice, bob, "hello").await.unwrap();

    let err = aggregator.mark_as_read(message.id, alice).await.unwrap_err();
    assert!(matches!(err, CoreError::Forbidden(_)));

    let err = aggregator.mark_as_read(9999, bob).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));

    aggregator.mark_as_read(message.id, bob).await.unwrap();
    let first_read_at: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT read_at FROM message WHERE id = ?1")
            .bind(message.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(first_read_at.is_some());

    // Re-marking succeeds without touching the original read_at
    aggregator.mark_as_read(message.id, bob).await.unwrap();
    let second_read_at: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT read_at FROM message WHERE id = ?1")
            .bind(message.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(first_read_at, second_read_at);
}

#[tokio::test]
async fn test_mark_all_as_read_counts_only_that_counterpart() {
    let pool = setup_pool().await;
    let store = MessageStore::new(pool.clone());
    let aggregator = ConversationAggregator::new(pool.clone());
    let me = create_user(&pool, "Me").await;
    let a = create_user(&pool, "A").await;
    let b = create_user(&pool, "B").await;

    store.send_message(a, me, "one").await.unwrap();
    store.send_message(a, me, "two").await.unwrap();
    store.send_message(b, me, "three").await.unwrap();

    let affected = aggregator.mark_all_as_read(me, a).await.unwrap();
    assert_eq!(affected, 2);
    assert_eq!(store.unread_total(me).await.unwrap(), 1);

    // Nothing left from that counterpart; zero is still a success
    let affected = aggregator.mark_all_as_read(me, a).await.unwrap();
    assert_eq!(affected, 0);
}
