//! Client-side dialog state machine.
//!
//! Drives a [`Dialog`] in response to requests this peer originates,
//! the ACKs it emits and the responses it receives. Unexpected events
//! in steady state are logged and ignored; illegal caller-initiated
//! requests surface an error so the caller can back off
//! (RFC 3261 §14.1).

use std::time::SystemTime;

use rsip::prelude::{HeadersExt, UntypedHeader};
use rsip::Method;
use tracing::{debug, info, warn};

use super::dialog::{Dialog, DialogState, TerminatedReason};
use super::DialogId;
use crate::call::Call;
use crate::transaction::Transaction;
use crate::{Error, Result};

impl Call {
    /// A locally originated request is about to be sent.
    ///
    /// ACK is not handled here (see [`Call::on_uac_ack`]). An absent
    /// dialog is fine for INVITE: the dialog is created on its first
    /// response.
    pub fn on_uac_request(&mut self, request: &rsip::Request) -> Result<()> {
        let method = request.method.clone();
        if method == Method::Ack {
            return Ok(());
        }

        let id = match DialogId::try_from(request) {
            // no dialog id on the wire yet
            Err(_) if method == Method::Invite => return Ok(()),
            Err(_) => {
                let call_id = request
                    .call_id_header()
                    .map(|c| c.value().to_string())
                    .unwrap_or_default();
                return Err(Error::Finished(DialogId::new(call_id, "", "")));
            }
            Ok(id) => id,
        };

        let Some(dialog) = self.dialogs.find_mut(&id) else {
            return if method == Method::Invite {
                Ok(())
            } else {
                Err(Error::Finished(id))
            };
        };

        // RFC 3261 §8.1.1.5: the local sequence never goes backwards
        let cseq = request.cseq_header()?.seq()?;
        if cseq > dialog.local_seq {
            dialog.local_seq = cseq;
        }

        match (&method, dialog.state) {
            (Method::Invite, DialogState::Confirmed) => {
                dialog.request = Some(request.clone());
                dialog.response = None;
                dialog.ack = None;
                if !request.body.is_empty() {
                    dialog.local_sdp = Some(request.body.clone());
                }
                dialog.transition(DialogState::ProceedingUac);
                Ok(())
            }
            // only one INVITE at a time within a dialog
            (Method::Invite, _) => Err(Error::RequestPending(id)),
            (Method::Bye, _) => {
                dialog.transition(DialogState::Bye);
                Ok(())
            }
            (_, DialogState::Bye) => Err(Error::Finished(id)),
            _ => Ok(()),
        }
    }

    /// A locally originated ACK is about to be sent.
    ///
    /// Only an ACK matching the stored INVITE's CSeq while the dialog
    /// waits in `AcceptedUac` confirms the dialog and is stored for
    /// 2xx retransmissions; everything else is deliberately ignored so
    /// that retransmitted ACKs keep flowing through the response path.
    pub fn on_uac_ack(&mut self, ack: &rsip::Request) {
        let id = match DialogId::try_from(ack) {
            Ok(id) => id,
            Err(e) => {
                info!("ack without dialog id: {}", e);
                return;
            }
        };
        let Some(dialog) = self.dialogs.find_mut(&id) else {
            info!("ack for unknown dialog {}", id);
            return;
        };

        let ack_cseq = ack.cseq_header().ok().and_then(|c| c.seq().ok());
        let invite_cseq = dialog
            .request
            .as_ref()
            .and_then(|r| r.cseq_header().ok())
            .and_then(|c| c.seq().ok());

        if dialog.state == DialogState::AcceptedUac && ack_cseq.is_some() && ack_cseq == invite_cseq
        {
            dialog.ack = Some(ack.clone());
            if !ack.body.is_empty() {
                dialog.local_sdp = Some(ack.body.clone());
            }
            dialog.transition(DialogState::Confirmed);
        } else {
            info!(
                "ignoring ack for dialog {} in state {} (cseq {:?}, invite {:?})",
                id, dialog.state, ack_cseq, invite_cseq
            );
        }
    }

    /// A response arrived for a request this peer originated.
    pub async fn on_uac_response(&mut self, trans: &Transaction) -> Result<()> {
        let Some(response) = trans.last_response.as_ref() else {
            return Ok(());
        };
        let method = trans.original.method.clone();
        let code = response.status_code.code();

        let Some(id) = DialogId::from_transaction(trans) else {
            debug!("response {} without dialog id, dropped", code);
            return Ok(());
        };

        if self.dialogs.find(&id).is_none() {
            if method == Method::Invite && code > 100 && code < 300 {
                let dialog = Dialog::new_uac(&self.app_id, &trans.original, response)?;
                info!("uac dialog created: {}", id);
                self.dialogs.update(dialog);
            } else {
                debug!("{} response for unknown dialog {}, dropped", code, id);
                return Ok(());
            }
        }

        // take the record out, advance it, swap it back in
        let Some(mut dialog) = self.dialogs.remove(&id) else {
            return Ok(());
        };
        self.uac_response(&method, code, trans, response, &mut dialog)
            .await;
        dialog.record_remote_endpoint(response);

        if dialog.is_terminated() {
            info!(
                "uac dialog {} terminated: {:?}",
                id, dialog.terminated_reason
            );
        } else {
            self.dialogs.update(dialog);
        }
        Ok(())
    }

    async fn uac_response(
        &self,
        method: &Method,
        code: u16,
        trans: &Transaction,
        response: &rsip::Response,
        dialog: &mut Dialog,
    ) {
        // 408 and 481 end the dialog no matter what (RFC 3261 §12.2.1.2)
        if code == 408 || code == 481 {
            dialog.terminate(TerminatedReason::Code(code));
            return;
        }
        if code < 101 {
            return;
        }

        match method {
            Method::Invite => self.uac_invite_response(code, trans, response, dialog).await,
            Method::Bye => {
                let from_tag = trans
                    .original
                    .from_header()
                    .ok()
                    .and_then(|f| f.tag().ok().flatten());
                let reason = match from_tag {
                    Some(tag) if tag.value() == dialog.local_tag => TerminatedReason::UacBye,
                    _ => TerminatedReason::UasBye,
                };
                dialog.terminate(reason);
            }
            _ => {}
        }
    }

    async fn uac_invite_response(
        &self,
        code: u16,
        trans: &Transaction,
        response: &rsip::Response,
        dialog: &mut Dialog,
    ) {
        match (code, dialog.state) {
            (101..=199, DialogState::Init | DialogState::ProceedingUac) => {
                dialog.request = Some(trans.original.clone());
                dialog.response = Some(response.clone());
                dialog.ack = None;
                dialog.early = true;
                dialog.target_refresh(response);
                dialog.transition(DialogState::ProceedingUac);
            }
            (200..=299, DialogState::Init | DialogState::ProceedingUac) => {
                dialog.request = Some(trans.original.clone());
                dialog.response = Some(response.clone());
                dialog.ack = None;
                if dialog.answered.is_none() {
                    dialog.answered = Some(SystemTime::now());
                }
                dialog.early = false;
                dialog.target_refresh(response);
                dialog.transition(DialogState::AcceptedUac);
            }
            (200..=299, DialogState::AcceptedUac | DialogState::Confirmed) => {
                self.retransmitted_2xx(dialog).await;
            }
            (300.., DialogState::Init | DialogState::ProceedingUac) => {
                if dialog.answered.is_some() {
                    // the INVITE transaction failed but the dialog was
                    // already answered once; it lives on
                    dialog.transition(DialogState::Confirmed);
                } else {
                    dialog.terminate(TerminatedReason::Code(code));
                }
            }
            _ => {
                info!(
                    "ignoring {} INVITE response for dialog {} in state {}",
                    code, dialog.id, dialog.state
                );
            }
        }
    }

    /// A repeated 2xx means our ACK got lost somewhere: replay the
    /// stored one instead of building a new ACK.
    async fn retransmitted_2xx(&self, dialog: &mut Dialog) {
        match dialog.ack.clone() {
            Some(ack) => match self.transport.resend_request(ack).await {
                Ok(_) => debug!(
                    "2xx retransmission for {} answered with stored ack",
                    dialog.id
                ),
                Err(e) => {
                    warn!("ack retransmission for {} failed: {}", dialog.id, e);
                    dialog.terminate(TerminatedReason::Code(503));
                }
            },
            None => info!(
                "2xx retransmission for {} before local ack, waiting",
                dialog.id
            ),
        }
    }
}
