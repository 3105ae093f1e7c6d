//! Builders and fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rsip::headers::*;
use rsip::{Header, Request, Response, Uri};

use crate::transport::Transport;
use crate::{Error, Result};

pub(crate) fn invite_request(
    call_id: &str,
    from_tag: &str,
    to_tag: Option<&str>,
    cseq: u32,
) -> Request {
    let to = match to_tag {
        Some(tag) => format!("Bob <sip:bob@example.com>;tag={}", tag),
        None => "Bob <sip:bob@example.com>".to_string(),
    };
    Request {
        method: rsip::Method::Invite,
        uri: Uri::try_from("sip:bob@example.com:5060").unwrap(),
        headers: vec![
            Via::new("SIP/2.0/UDP alice.example.com:5060;branch=z9hG4bKnashds").into(),
            CSeq::new(format!("{} INVITE", cseq)).into(),
            From::new(format!("Alice <sip:alice@example.com>;tag={}", from_tag)).into(),
            To::new(to).into(),
            CallId::new(call_id).into(),
            Contact::new("<sip:alice@alice.example.com:5060>").into(),
            MaxForwards::new("70").into(),
        ]
        .into(),
        version: rsip::Version::V2,
        body: b"v=0\r\no=alice 2890844526 2890844527 IN IP4 host.atlanta.com\r\n".to_vec(),
    }
}

pub(crate) fn bye_request(call_id: &str, from_tag: &str, to_tag: &str, cseq: u32) -> Request {
    Request {
        method: rsip::Method::Bye,
        uri: Uri::try_from("sip:bob@bob.example.com:5060").unwrap(),
        headers: vec![
            Via::new("SIP/2.0/UDP alice.example.com:5060;branch=z9hG4bKbye").into(),
            CSeq::new(format!("{} BYE", cseq)).into(),
            From::new(format!("Alice <sip:alice@example.com>;tag={}", from_tag)).into(),
            To::new(format!("Bob <sip:bob@example.com>;tag={}", to_tag)).into(),
            CallId::new(call_id).into(),
            MaxForwards::new("70").into(),
        ]
        .into(),
        version: rsip::Version::V2,
        body: vec![],
    }
}

/// The ACK matching an INVITE: same CSeq number, To-tag of the answer.
pub(crate) fn ack_for(invite: &Request, to_tag: &str) -> Request {
    use rsip::prelude::HeadersExt;
    let cseq = invite.cseq_header().unwrap().seq().unwrap();
    let mut headers = invite.headers.clone();
    headers.retain(|h| {
        matches!(
            h,
            Header::Via(_) | Header::From(_) | Header::CallId(_) | Header::MaxForwards(_)
        )
    });
    headers.push(CSeq::new(format!("{} ACK", cseq)).into());
    headers.push(To::new(format!("Bob <sip:bob@example.com>;tag={}", to_tag)).into());
    Request {
        method: rsip::Method::Ack,
        uri: invite.uri.clone(),
        headers,
        version: rsip::Version::V2,
        body: vec![],
    }
}

/// A response to `request`: same dialog headers, optional To-tag, a
/// Contact of the answering side.
pub(crate) fn response_for(request: &Request, code: u16, to_tag: Option<&str>) -> Response {
    let mut headers = request.headers.clone();
    headers.retain(|h| {
        matches!(
            h,
            Header::Via(_) | Header::From(_) | Header::CallId(_) | Header::CSeq(_)
        )
    });
    let to = match to_tag {
        Some(tag) => format!("Bob <sip:bob@example.com>;tag={}", tag),
        None => "Bob <sip:bob@example.com>".to_string(),
    };
    headers.push(To::new(to).into());
    headers.push(Contact::new("<sip:bob@bob.example.com:5060>").into());
    Response {
        status_code: rsip::StatusCode::try_from(code).unwrap(),
        version: rsip::Version::V2,
        headers,
        body: vec![],
    }
}

/// Transport fake: records everything, optionally failing all sends.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub sent: Mutex<Vec<Request>>,
    pub resent: Mutex<Vec<Request>>,
    pub responses: Mutex<Vec<Response>>,
    fail: AtomicBool,
    local_hosts: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_local_hosts(&self, hosts: Vec<String>) {
        *self.local_hosts.lock().unwrap() = hosts;
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(Error::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send_request(&self, request: Request) -> Result<()> {
        self.check()?;
        self.sent.lock().unwrap().push(request);
        Ok(())
    }

    async fn resend_request(&self, request: Request) -> Result<()> {
        self.check()?;
        self.resent.lock().unwrap().push(request);
        Ok(())
    }

    async fn send_response(&self, response: Response) -> Result<()> {
        self.check()?;
        self.responses.lock().unwrap().push(response);
        Ok(())
    }

    fn add_via(&self, mut request: Request) -> Request {
        use crate::rsip_ext::RsipHeadersExt;
        request.headers.push_front(Header::Via(
            "SIP/2.0/UDP proxy.local:5060;branch=z9hG4bKmock".into(),
        ));
        request
    }

    fn is_local(&self, _app_id: &str, uri: &Uri) -> bool {
        let host = uri.host_with_port.host.to_string();
        self.local_hosts.lock().unwrap().contains(&host)
    }
}
