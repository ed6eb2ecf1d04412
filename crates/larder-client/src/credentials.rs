use std::sync::RwLock;

/// Source of the current bearer credential. Issuance, refresh, and expiry
/// tracking live in the external auth layer; the connection manager only
/// asks "is there a credential right now".
pub trait CredentialProvider: Send + Sync {
    fn current(&self) -> Option<String>;
}

/// Holds a credential that login/logout can swap out. Also the backing
/// store for the background path, which learns the token only through
/// explicit messages.
#[derive(Default)]
pub struct StaticCredential {
    token: RwLock<Option<String>>,
}

impl StaticCredential {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }
}

impl CredentialProvider for StaticCredential {
    fn current(&self) -> Option<String> {
        self.token.read().ok()?.clone()
    }
}
