//! Message history: an append-only ordered log of [`Message`] values
//! scoped to one session, backed by a [`CollectionProvider`].

use std::sync::Arc;

use agent_storage::CollectionProvider;

use crate::error::CoreResult;
use crate::message::Message;

pub struct MessageHistory {
    collection: CollectionProvider,
}

impl MessageHistory {
    pub fn new(backend: Arc<dyn agent_storage::StorageBackend>, session_id: &str) -> Self {
        Self {
            collection: CollectionProvider::new(backend, format!("messages:{session_id}")),
        }
    }

    pub async fn add_message(&self, message: &Message) -> CoreResult<()> {
        self.collection.add(message).await?;
        Ok(())
    }

    pub async fn get_messages(&self) -> CoreResult<Vec<Message>> {
        Ok(self.collection.get_all().await?)
    }

    pub async fn clear(&self) -> CoreResult<()> {
        self.collection.clear().await?;
        Ok(())
    }

    pub async fn len(&self) -> CoreResult<usize> {
        Ok(self.collection.count().await?)
    }

    pub async fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_storage::backends::MemoryBackend;

    fn backend() -> Arc<dyn agent_storage::StorageBackend> {
        Arc::new(MemoryBackend::new(None))
    }

    #[tokio::test]
    async fn messages_append_and_replay_in_order() {
        let history = MessageHistory::new(backend(), "s1");
        history.add_message(&Message::user("hi")).await.unwrap();
        history
            .add_message(&Message::assistant("hello there"))
            .await
            .unwrap();
        let messages = history.get_messages().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.as_text(), "hi");
        assert_eq!(messages[1].content.as_text(), "hello there");
    }

    #[tokio::test]
    async fn clear_empties_the_session_log() {
        let history = MessageHistory::new(backend(), "s1");
        history.add_message(&Message::user("hi")).await.unwrap();
        history.clear().await.unwrap();
        assert!(history.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn separate_sessions_do_not_share_history() {
        let backend = backend();
        let a = MessageHistory::new(backend.clone(), "a");
        let b = MessageHistory::new(backend, "b");
        a.add_message(&Message::user("only in a")).await.unwrap();
        assert_eq!(a.get_messages().await.unwrap().len(), 1);
        assert_eq!(b.get_messages().await.unwrap().len(), 0);
    }
}
