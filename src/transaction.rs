use rand::Rng;
use rsip::prelude::HeadersExt;

/// Role of the peer in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionRole {
    Client,
    Server,
}

/// The slice of a transaction the dialog core consumes.
///
/// The transaction layer itself (timers A-K, retransmission, matching)
/// lives outside this crate; its events arrive here carrying the
/// original request and, for client transactions, the most recent
/// response.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub role: TransactionRole,
    /// The request this transaction was created for.
    pub original: rsip::Request,
    /// Most recent response seen on a client transaction.
    pub last_response: Option<rsip::Response>,
    /// To-tag assigned locally before any response carried one. Used to
    /// compute the dialog id of an INVITE that is still tag-less on the
    /// wire.
    pub pending_to_tag: Option<String>,
    /// Set by the proxy when the request is forwarded statelessly.
    pub stateless: bool,
    /// Set by the proxy when Record-Route insertion was requested.
    pub record_route: bool,
}

impl Transaction {
    pub fn new_client(original: rsip::Request) -> Self {
        Self {
            role: TransactionRole::Client,
            original,
            last_response: None,
            pending_to_tag: None,
            stateless: false,
            record_route: false,
        }
    }

    pub fn new_server(original: rsip::Request) -> Self {
        Self {
            role: TransactionRole::Server,
            original,
            last_response: None,
            pending_to_tag: None,
            stateless: false,
            record_route: false,
        }
    }

    pub fn with_response(mut self, response: rsip::Response) -> Self {
        self.last_response = Some(response);
        self
    }

    pub fn method(&self) -> &rsip::Method {
        &self.original.method
    }

    pub fn cseq(&self) -> crate::Result<u32> {
        Ok(self.original.cseq_header()?.seq()?)
    }

    /// Status code of the last response, 0 when none arrived yet.
    pub fn response_code(&self) -> u16 {
        self.last_response
            .as_ref()
            .map(|r| r.status_code.code())
            .unwrap_or(0)
    }
}

/// Random token for From/To tag parameters.
pub fn make_tag() -> String {
    format!("{:x}", rand::random::<u64>())
}

pub fn make_call_id(suffix: Option<&str>) -> rsip::headers::CallId {
    let call_id = match suffix {
        Some(suffix) => format!("{}@{}", uuid::Uuid::new_v4(), suffix),
        None => uuid::Uuid::new_v4().to_string(),
    };
    call_id.into()
}

/// Fresh CSeq seed in `[1, 2^31)` (RFC 3261 §8.1.1.5).
pub fn fresh_cseq() -> u32 {
    rand::rng().random_range(1..0x8000_0000u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_cseq_range() {
        for _ in 0..64 {
            let seq = fresh_cseq();
            assert!(seq >= 1);
            assert!(seq < 0x8000_0000);
        }
    }

    #[test]
    fn test_make_call_id_suffix() {
        use rsip::prelude::UntypedHeader;
        let call_id = make_call_id(Some("example.com"));
        assert!(call_id.value().ends_with("@example.com"));
        assert_ne!(make_call_id(None).value(), make_call_id(None).value());
    }
}
