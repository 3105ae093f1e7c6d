use std::fmt;
use std::hash::{Hash, Hasher};

use rsip::prelude::{HeadersExt, UntypedHeader};

use crate::transaction::Transaction;

pub mod dialog;
pub mod request;
pub mod store;
pub mod uac;

/// Unique identifier of a SIP dialog (Call-ID + the two tags).
///
/// Identity is symmetric in the tags: the UAC and the UAS of the same
/// dialog derive equal ids even though each calls its own tag the
/// "from" tag (RFC 3261 §12). Equality, hashing and [`DialogId::hash`]
/// all operate on the lexicographically sorted tag pair.
///
/// ```
/// use sipcall::dialog::DialogId;
///
/// let a = DialogId::new("call-1", "tag-a", "tag-b");
/// let b = DialogId::new("call-1", "tag-b", "tag-a");
/// assert_eq!(a, b);
/// assert_eq!(a.hash(), b.hash());
/// ```
#[derive(Debug, Clone)]
pub struct DialogId {
    pub call_id: String,
    pub from_tag: String,
    pub to_tag: String,
}

impl DialogId {
    pub fn new(call_id: impl Into<String>, from_tag: impl Into<String>, to_tag: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            from_tag: from_tag.into(),
            to_tag: to_tag.into(),
        }
    }

    fn sorted_tags(&self) -> (&str, &str) {
        if self.from_tag <= self.to_tag {
            (&self.from_tag, &self.to_tag)
        } else {
            (&self.to_tag, &self.from_tag)
        }
    }

    /// Deterministic 32-bit identity over (call-id, low tag, high tag),
    /// FNV-1a.
    pub fn hash(&self) -> u32 {
        const FNV_OFFSET: u32 = 0x811c_9dc5;
        const FNV_PRIME: u32 = 0x0100_0193;
        let (low, high) = self.sorted_tags();
        let mut state = FNV_OFFSET;
        for part in [self.call_id.as_str(), low, high] {
            for b in part.bytes() {
                state ^= b as u32;
                state = state.wrapping_mul(FNV_PRIME);
            }
            state ^= 0xff;
            state = state.wrapping_mul(FNV_PRIME);
        }
        state
    }

    /// Dialog id for a transaction. Falls back to the transaction's
    /// pending to-tag when an INVITE has no To-tag on the wire yet;
    /// `None` when the id is undefined.
    pub fn from_transaction(trans: &Transaction) -> Option<Self> {
        let request = &trans.original;
        let call_id = request.call_id_header().ok()?.value().to_string();
        let from_tag = request
            .from_header()
            .ok()?
            .tag()
            .ok()
            .flatten()?
            .value()
            .to_string();
        let to_tag = trans
            .last_response
            .as_ref()
            .and_then(|r| r.to_header().ok())
            .and_then(|t| t.tag().ok().flatten())
            .map(|t| t.value().to_string())
            .or_else(|| {
                request
                    .to_header()
                    .ok()
                    .and_then(|t| t.tag().ok().flatten())
                    .map(|t| t.value().to_string())
            })
            .or_else(|| {
                if request.method == rsip::Method::Invite {
                    trans.pending_to_tag.clone()
                } else {
                    None
                }
            })?;
        if from_tag.is_empty() || to_tag.is_empty() {
            return None;
        }
        Some(Self {
            call_id,
            from_tag,
            to_tag,
        })
    }

    /// Dialog id from an outgoing request and the response that
    /// answers it (the To-tag is taken from the response).
    pub fn from_pair(request: &rsip::Request, response: &rsip::Response) -> crate::Result<Self> {
        let call_id = request.call_id_header()?.value().to_string();
        let from_tag = request
            .from_header()?
            .tag()?
            .ok_or_else(|| crate::Error::SipMessage("from header has no tag".into()))?
            .value()
            .to_string();
        let to_tag = response
            .to_header()?
            .tag()?
            .ok_or_else(|| crate::Error::SipMessage("to header has no tag".into()))?
            .value()
            .to_string();
        Ok(Self {
            call_id,
            from_tag,
            to_tag,
        })
    }
}

impl TryFrom<&rsip::Request> for DialogId {
    type Error = crate::Error;

    fn try_from(request: &rsip::Request) -> crate::Result<Self> {
        let call_id = request.call_id_header()?.value().to_string();
        let from_tag = request
            .from_header()?
            .tag()?
            .ok_or_else(|| crate::Error::SipMessage("from header has no tag".into()))?
            .value()
            .to_string();
        let to_tag = request
            .to_header()?
            .tag()?
            .ok_or_else(|| crate::Error::SipMessage("to header has no tag".into()))?
            .value()
            .to_string();
        Ok(Self {
            call_id,
            from_tag,
            to_tag,
        })
    }
}

impl TryFrom<&rsip::Response> for DialogId {
    type Error = crate::Error;

    fn try_from(response: &rsip::Response) -> crate::Result<Self> {
        let call_id = response.call_id_header()?.value().to_string();
        let from_tag = response
            .from_header()?
            .tag()?
            .ok_or_else(|| crate::Error::SipMessage("from header has no tag".into()))?
            .value()
            .to_string();
        let to_tag = response
            .to_header()?
            .tag()?
            .ok_or_else(|| crate::Error::SipMessage("to header has no tag".into()))?
            .value()
            .to_string();
        Ok(Self {
            call_id,
            from_tag,
            to_tag,
        })
    }
}

impl PartialEq for DialogId {
    fn eq(&self, other: &Self) -> bool {
        self.call_id == other.call_id && self.sorted_tags() == other.sorted_tags()
    }
}

impl Eq for DialogId {}

impl Hash for DialogId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (low, high) = self.sorted_tags();
        self.call_id.hash(state);
        low.hash(state);
        high.hash(state);
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.call_id, self.from_tag, self.to_tag)
    }
}
