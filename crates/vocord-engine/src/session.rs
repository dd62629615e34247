use std::time::Instant;

/// One voice session. At most one exists per engine instance; created by
/// `start()`, destroyed by `stop()` or an unrecoverable error.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// False until the server issues its own id via `session.created`.
    pub server_issued: bool,
    pub started_at: Instant,
}

impl Session {
    pub fn local() -> Self {
        Self {
            id: format!("local-{:08x}", rand::random::<u32>()),
            server_issued: false,
            started_at: Instant::now(),
        }
    }

    pub fn adopt_server_id(&mut self, id: &str) {
        if !id.is_empty() {
            self.id = id.to_string();
            self.server_issued = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_distinct() {
        assert_ne!(Session::local().id, Session::local().id);
    }

    #[test]
    fn server_id_replaces_local() {
        let mut session = Session::local();
        session.adopt_server_id("sess_abc123");
        assert_eq!(session.id, "sess_abc123");
        assert!(session.server_issued);
    }

    #[test]
    fn empty_server_id_is_ignored() {
        let mut session = Session::local();
        let local = session.id.clone();
        session.adopt_server_id("");
        assert_eq!(session.id, local);
        assert!(!session.server_issued);
    }
}
