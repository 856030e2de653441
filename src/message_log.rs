use crate::model::{ChatMessage, MessageSender};

/// Handle to a locally appended message, used to roll it back. Keys grow in
/// log order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalKey(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub key: LocalKey,
    pub message: ChatMessage,
    pub pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Appended,
    /// Server echo of a pending local message.
    Confirmed(LocalKey),
    /// Already present under the same server id.
    Duplicate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    next_key: u64,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> + '_ {
        self.entries.iter().map(|entry| &entry.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|entry| entry.pending).count()
    }

    pub fn append_pending(&mut self, message: ChatMessage) -> LocalKey {
        let key = self.allocate();
        self.entries.push(LogEntry {
            key,
            message,
            pending: true,
        });
        key
    }

    /// Removes a message that is still pending. Confirmed messages stay.
    pub fn rollback(&mut self, key: LocalKey) -> Option<ChatMessage> {
        let idx = self
            .entries
            .iter()
            .position(|entry| entry.key == key && entry.pending)?;
        Some(self.entries.remove(idx).message)
    }

    /// Adds a message from the live feed. A consumer message may be the echo
    /// of a pending send.
    pub fn ingest(&mut self, message: ChatMessage) -> Ingest {
        self.insert(message, true)
    }

    /// Adds a message from fetched history. History never confirms a pending
    /// send, since it predates it.
    pub fn ingest_history(&mut self, message: ChatMessage) -> Ingest {
        self.insert(message, false)
    }

    fn insert(&mut self, message: ChatMessage, may_confirm: bool) -> Ingest {
        if let Some(id) = message.message_id {
            if self
                .entries
                .iter()
                .any(|entry| entry.message.message_id == Some(id))
            {
                return Ingest::Duplicate;
            }
        }

        if may_confirm && message.sender == MessageSender::Consumer {
            if let Some(entry) = self
                .entries
                .iter_mut()
                .find(|entry| entry.pending && entry.message.text == message.text)
            {
                entry.pending = false;
                entry.message.message_id = message.message_id;
                return Ingest::Confirmed(entry.key);
            }
        }

        let key = self.allocate();
        self.entries.push(LogEntry {
            key,
            message,
            pending: false,
        });
        Ingest::Appended
    }

    fn allocate(&mut self) -> LocalKey {
        let key = LocalKey(self.next_key);
        self.next_key += 1;
        key
    }
}
