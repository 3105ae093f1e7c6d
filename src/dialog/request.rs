//! Builder for outbound in-dialog requests.
//!
//! Everything the dialog dictates (From/To with tags, Call-ID, CSeq,
//! route set, Contact fallback, ACK credentials) is assembled here;
//! the caller's options fill in the rest and win on duplicates.

use rsip::prelude::HeadersExt;
use rsip::{Header, Method, Param};
use tracing::info;

use super::dialog::DialogState;
use super::DialogId;
use crate::call::Call;
use crate::rsip_ext::parse_uris;
use crate::transaction::fresh_cseq;
use crate::{Error, Result};

/// Caller-supplied Contact for an in-dialog request.
#[derive(Debug, Clone)]
pub enum ContactSpec {
    /// Ask the transport to fill in a Contact for the chosen flow.
    MakeContact,
    Uris(Vec<rsip::Uri>),
    /// Raw header value; parsed at build time, silently discarded when
    /// invalid.
    Unparsed(String),
}

/// Options for [`Call::make_dialog_request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOption {
    /// Explicit CSeq number. `None` advances the dialog's local
    /// sequence (or reuses the INVITE's number for ACK).
    pub cseq: Option<u32>,
    pub contact: Option<ContactSpec>,
    /// Extra headers, appended after the dialog-derived set.
    pub headers: Vec<Header>,
    pub body: Option<Vec<u8>>,
}

/// Resolved Contact of a built request.
#[derive(Debug, Clone, PartialEq)]
pub enum ContactField {
    MakeContact,
    Uris(Vec<rsip::Uri>),
}

/// An in-dialog request ready for the transaction layer.
#[derive(Debug, Clone)]
pub struct DialogRequest {
    pub app_id: String,
    /// Request-URI: the dialog's remote target.
    pub uri: rsip::Uri,
    pub from: rsip::typed::From,
    pub to: rsip::typed::To,
    pub call_id: rsip::headers::CallId,
    pub cseq: rsip::typed::CSeq,
    pub route: Vec<rsip::headers::Route>,
    pub contact: ContactField,
    /// Headers that must precede everything else (ACK credentials).
    pub pre_headers: Vec<Header>,
    pub headers: Vec<Header>,
    pub body: Option<Vec<u8>>,
}

impl Call {
    /// Build an outbound request inside an existing dialog, advancing
    /// the dialog's local CSeq (RFC 3261 §12.2.1.1).
    ///
    /// ACK is only legal while the dialog waits for it in
    /// `AcceptedUac`; it reuses the INVITE's CSeq number and carries
    /// over any Authorization / Proxy-Authorization headers of the
    /// stored INVITE.
    pub fn make_dialog_request(
        &mut self,
        id: &DialogId,
        method: Method,
        opt: RequestOption,
    ) -> Result<DialogRequest> {
        let Some(dialog) = self.dialogs.find_mut(id) else {
            return Err(Error::UnknownDialog(id.clone()));
        };

        if method == Method::Ack && dialog.state != DialogState::AcceptedUac {
            return Err(Error::InvalidDialog(
                format!("cannot ack in state {}", dialog.state),
                id.clone(),
            ));
        }

        let seq = match opt.cseq {
            None if method == Method::Ack => {
                let invite = dialog.request.as_ref().ok_or_else(|| {
                    Error::InvalidDialog("no invite to ack".into(), id.clone())
                })?;
                invite.cseq_header()?.seq()?
            }
            None if dialog.local_seq > 0 => {
                dialog.local_seq += 1;
                dialog.local_seq
            }
            None => {
                dialog.local_seq = fresh_cseq();
                dialog.local_seq
            }
            // caller-driven replay: the wire gets the caller's number,
            // an already advanced local sequence stays put
            Some(n) if dialog.local_seq > 0 => n,
            Some(n) => {
                dialog.local_seq = n;
                n
            }
        };

        let from = rsip::typed::From {
            display_name: None,
            uri: dialog.local_uri.clone(),
            params: vec![Param::Tag(dialog.local_tag.clone().into())],
        };
        let to = rsip::typed::To {
            display_name: None,
            uri: dialog.remote_uri.clone(),
            params: vec![Param::Tag(dialog.remote_tag().to_string().into())],
        };

        let contact = match opt.contact {
            Some(ContactSpec::MakeContact) => ContactField::MakeContact,
            Some(ContactSpec::Uris(uris)) if !uris.is_empty() => ContactField::Uris(uris),
            Some(ContactSpec::Unparsed(line)) => match parse_uris(&line) {
                Ok(uris) if !uris.is_empty() => ContactField::Uris(uris),
                _ => {
                    info!("invalid contact {:?}, using dialog target", line);
                    ContactField::Uris(vec![dialog.local_target.clone()])
                }
            },
            _ => ContactField::Uris(vec![dialog.local_target.clone()]),
        };

        let mut pre_headers = Vec::new();
        if method == Method::Ack {
            if let Some(invite) = dialog.request.as_ref() {
                for header in invite.headers.iter() {
                    if matches!(
                        header,
                        Header::Authorization(_) | Header::ProxyAuthorization(_)
                    ) {
                        pre_headers.push(header.clone());
                    }
                }
            }
        }

        Ok(DialogRequest {
            app_id: self.app_id.clone(),
            uri: dialog.remote_target.clone(),
            from,
            to,
            call_id: dialog.call_id.clone().into(),
            cseq: rsip::typed::CSeq { seq, method },
            route: dialog.route_set.clone(),
            contact,
            pre_headers,
            headers: opt.headers,
            body: opt.body,
        })
    }
}

impl DialogRequest {
    /// Assemble the wire message. The transport still prepends its Via
    /// (and a Contact when [`ContactField::MakeContact`] was chosen).
    pub fn into_request(self) -> rsip::Request {
        let method = self.cseq.method.clone();
        let mut headers: rsip::Headers = self.pre_headers.into();
        headers.push(Header::CallId(self.call_id));
        headers.push(Header::From(self.from.into()));
        headers.push(Header::To(self.to.into()));
        headers.push(Header::CSeq(self.cseq.into()));
        if let ContactField::Uris(uris) = &self.contact {
            for uri in uris {
                let contact = rsip::typed::Contact {
                    display_name: None,
                    uri: uri.clone(),
                    params: vec![],
                };
                headers.push(Header::Contact(contact.into()));
            }
        }
        for route in &self.route {
            headers.push(Header::Route(route.clone()));
        }
        headers.push(Header::MaxForwards(70.into()));
        // caller headers override the defaults
        for header in self.headers {
            headers.unique_push(header);
        }
        let body = self.body.unwrap_or_default();
        if !body.is_empty() {
            headers.push(Header::ContentLength((body.len() as u32).into()));
        }

        rsip::Request {
            method,
            uri: self.uri,
            headers,
            version: rsip::Version::V2,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallOptions;
    use crate::tests_common::{ack_for, invite_request, response_for, MockTransport};
    use crate::transaction::Transaction;
    use rsip::prelude::UntypedHeader;
    use std::sync::Arc;

    async fn accepted_call(invite: rsip::Request) -> (Call, DialogId) {
        let transport = Arc::new(MockTransport::default());
        let mut call = Call::new("app-1", "call-1", transport, CallOptions::default());
        let ok = response_for(&invite, 200, Some("bob-tag"));
        let trans = Transaction::new_client(invite).with_response(ok);
        call.on_uac_response(&trans).await.unwrap();
        let id = DialogId::new("call-1", "alice-tag", "bob-tag");
        (call, id)
    }

    #[tokio::test]
    async fn test_cseq_advances() {
        let invite = invite_request("call-1", "alice-tag", None, 5);
        let (mut call, id) = accepted_call(invite.clone()).await;
        call.on_uac_ack(&ack_for(&invite, "bob-tag"));

        let bye = call
            .make_dialog_request(&id, Method::Bye, RequestOption::default())
            .unwrap();
        assert_eq!(bye.cseq.seq, 6);
        assert_eq!(call.dialog(&id).unwrap().local_seq, 6);

        let info = call
            .make_dialog_request(&id, Method::Info, RequestOption::default())
            .unwrap();
        assert_eq!(info.cseq.seq, 7);
    }

    #[tokio::test]
    async fn test_cseq_explicit_replay() {
        let invite = invite_request("call-1", "alice-tag", None, 5);
        let (mut call, id) = accepted_call(invite.clone()).await;
        call.on_uac_ack(&ack_for(&invite, "bob-tag"));

        let opt = RequestOption {
            cseq: Some(99),
            ..Default::default()
        };
        let req = call.make_dialog_request(&id, Method::Info, opt).unwrap();
        assert_eq!(req.cseq.seq, 99);
        // replay does not move the dialog sequence
        assert_eq!(call.dialog(&id).unwrap().local_seq, 5);
    }

    #[tokio::test]
    async fn test_ack_reuses_invite_cseq() {
        let invite = invite_request("call-1", "alice-tag", None, 41);
        let (mut call, id) = accepted_call(invite).await;

        let ack = call
            .make_dialog_request(&id, Method::Ack, RequestOption::default())
            .unwrap();
        assert_eq!(ack.cseq.seq, 41);
        assert_eq!(ack.cseq.method, Method::Ack);
        assert_eq!(call.dialog(&id).unwrap().local_seq, 41);
    }

    #[tokio::test]
    async fn test_ack_requires_accepted_state() {
        let transport = Arc::new(MockTransport::default());
        let mut call = Call::new("app-1", "call-1", transport, CallOptions::default());

        let invite = invite_request("call-1", "alice-tag", None, 1);
        let ringing = response_for(&invite, 180, Some("bob-tag"));
        let trans = Transaction::new_client(invite).with_response(ringing);
        call.on_uac_response(&trans).await.unwrap();

        let id = DialogId::new("call-1", "alice-tag", "bob-tag");
        assert!(matches!(
            call.make_dialog_request(&id, Method::Ack, RequestOption::default()),
            Err(Error::InvalidDialog(_, _))
        ));

        let unknown = DialogId::new("call-1", "alice-tag", "other-tag");
        assert!(matches!(
            call.make_dialog_request(&unknown, Method::Bye, RequestOption::default()),
            Err(Error::UnknownDialog(_))
        ));
    }

    #[tokio::test]
    async fn test_ack_propagates_credentials() {
        let mut invite = invite_request("call-1", "alice-tag", None, 3);
        invite.headers.push(Header::ProxyAuthorization(
            r#"Digest username="alice", realm="example.com", nonce="xyz""#.into(),
        ));
        let (mut call, id) = accepted_call(invite).await;

        let ack = call
            .make_dialog_request(&id, Method::Ack, RequestOption::default())
            .unwrap();
        assert_eq!(ack.pre_headers.len(), 1);
        assert!(matches!(ack.pre_headers[0], Header::ProxyAuthorization(_)));

        let request = ack.into_request();
        assert!(request
            .headers
            .iter()
            .any(|h| matches!(h, Header::ProxyAuthorization(_))));
    }

    #[tokio::test]
    async fn test_contact_resolution() {
        let invite = invite_request("call-1", "alice-tag", None, 1);
        let (mut call, id) = accepted_call(invite.clone()).await;
        call.on_uac_ack(&ack_for(&invite, "bob-tag"));

        // default: the dialog's own contact
        let req = call
            .make_dialog_request(&id, Method::Info, RequestOption::default())
            .unwrap();
        assert_eq!(
            req.contact,
            ContactField::Uris(vec![rsip::Uri::try_from(
                "sip:alice@alice.example.com:5060"
            )
            .unwrap()])
        );

        // invalid strings fall back to the default
        let opt = RequestOption {
            contact: Some(ContactSpec::Unparsed("###".into())),
            ..Default::default()
        };
        let req = call.make_dialog_request(&id, Method::Info, opt).unwrap();
        assert_eq!(
            req.contact,
            ContactField::Uris(vec![rsip::Uri::try_from(
                "sip:alice@alice.example.com:5060"
            )
            .unwrap()])
        );

        // the marker passes through
        let opt = RequestOption {
            contact: Some(ContactSpec::MakeContact),
            ..Default::default()
        };
        let req = call.make_dialog_request(&id, Method::Info, opt).unwrap();
        assert_eq!(req.contact, ContactField::MakeContact);
    }

    #[tokio::test]
    async fn test_into_request_assembly() {
        let invite = invite_request("call-1", "alice-tag", None, 1);
        let (mut call, id) = accepted_call(invite.clone()).await;
        call.on_uac_ack(&ack_for(&invite, "bob-tag"));

        let opt = RequestOption {
            headers: vec![Header::UserAgent("test-ua".into())],
            body: Some(b"hello".to_vec()),
            ..Default::default()
        };
        let request = call
            .make_dialog_request(&id, Method::Info, opt)
            .unwrap()
            .into_request();

        assert_eq!(request.method, Method::Info);
        assert_eq!(
            request.uri,
            rsip::Uri::try_from("sip:bob@bob.example.com:5060").unwrap()
        );
        assert_eq!(request.call_id_header().unwrap().value(), "call-1");
        assert_eq!(request.cseq_header().unwrap().seq().unwrap(), 2);
        assert!(request
            .headers
            .iter()
            .any(|h| matches!(h, Header::UserAgent(_))));
        assert_eq!(request.body, b"hello".to_vec());
        let to_tag = request.to_header().unwrap().tag().unwrap().unwrap();
        assert_eq!(to_tag.value(), "bob-tag");
    }
}
