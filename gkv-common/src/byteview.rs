use std::fmt;
use std::sync::Arc;

/// An immutable view over a byte buffer shared by reference count.
///
/// Internal paths (the store, the policy) clone a `ByteView` cheaply by
/// bumping the refcount. Anything handed back across an untrusted boundary
/// (the public `Group` API, a decoded peer response) should go through
/// [`ByteView::to_vec`] so the caller cannot observe or mutate cache-owned
/// memory.
#[derive(Clone)]
pub struct ByteView(Arc<[u8]>);

impl ByteView {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        ByteView(bytes.into())
    }

    pub fn from_static(bytes: &'static [u8]) -> Self {
        ByteView(Arc::from(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying bytes without copying. Only safe for
    /// short-lived internal use; never leak this slice's lifetime across
    /// an API boundary that outlives the `ByteView` itself.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Defensive copy for callers outside the cache's trust boundary.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "ByteView({:?})", s),
            None => write!(f, "ByteView({} bytes)", self.0.len()),
        }
    }
}

impl PartialEq for ByteView {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}

impl Eq for ByteView {}

impl From<Vec<u8>> for ByteView {
    fn from(v: Vec<u8>) -> Self {
        ByteView(Arc::from(v.into_boxed_slice()))
    }
}

impl From<&[u8]> for ByteView {
    fn from(v: &[u8]) -> Self {
        ByteView(Arc::from(v))
    }
}

impl From<String> for ByteView {
    fn from(v: String) -> Self {
        ByteView(Arc::from(v.into_bytes().into_boxed_slice()))
    }
}

impl From<&str> for ByteView {
    fn from(v: &str) -> Self {
        ByteView(Arc::from(v.as_bytes()))
    }
}
