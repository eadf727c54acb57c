//! APCI link layer.
//!
//! [`ApciConnection`] implements [`Connection`] on top of any byte stream:
//! it confirms U-frames, keeps the I-frame sequence counters, acknowledges
//! received I-frames every `w` frames and never has more than `k` sent
//! I-frames unacknowledged.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::codec::{Apdu, Iec104Codec};
use crate::config::StationConfig;
use crate::error::{Iec104Error, Result};
use crate::macros::{log_debug, log_trace, log_warn};
use crate::parser::negative_echo;
use crate::session::{Connection, LinkEvent};
use crate::types::{seq_distance, seq_next, Apci, Asdu, Cot, UFunction};

/// APCI connection over TCP.
pub type TcpConnection = ApciConnection<TcpStream>;

/// IEC 104 link over a byte stream.
#[derive(Debug)]
pub struct ApciConnection<S> {
    framed: Framed<S, Iec104Codec>,
    k: u16,
    w: u16,
    /// V(S): next send sequence number
    send_seq: u16,
    /// V(R): next expected receive sequence number
    recv_seq: u16,
    /// Oldest sent I-frame not yet acknowledged by the peer
    ack_seq: u16,
    /// Received I-frames not yet acknowledged to the peer
    unacked_recv: u16,
    started: bool,
    /// Events read while waiting for the send window
    backlog: VecDeque<LinkEvent>,
    /// Encoded ASDUs waiting to go out, e.g. negative echoes
    outbox: VecDeque<Bytes>,
}

impl<S> ApciConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap `stream` with window size `k` and acknowledge threshold `w`.
    pub fn new(stream: S, k: u16, w: u16) -> Self {
        Self {
            framed: Framed::new(stream, Iec104Codec::new()),
            k: k.max(1),
            w: w.max(1),
            send_seq: 0,
            recv_seq: 0,
            ack_seq: 0,
            unacked_recv: 0,
            started: false,
            backlog: VecDeque::new(),
            outbox: VecDeque::new(),
        }
    }

    /// Wrap `stream` with the station's k and w.
    pub fn with_config(stream: S, config: &StationConfig) -> Self {
        Self::new(stream, config.k, config.w)
    }

    /// Whether STARTDT has been received and not revoked.
    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Sent I-frames the peer has not acknowledged yet.
    #[inline]
    pub fn unacknowledged(&self) -> u16 {
        seq_distance(self.ack_seq, self.send_seq)
    }

    /// The underlying stream.
    pub fn get_ref(&self) -> &S {
        self.framed.get_ref()
    }

    async fn next_frame(&mut self) -> Result<Option<Apdu>> {
        match self.framed.next().await {
            Some(Ok(apdu)) => {
                log_trace!("RX {}", apdu);
                Ok(Some(apdu))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn write(&mut self, apdu: Apdu) -> Result<()> {
        log_trace!("TX {}", apdu);
        self.framed.send(apdu).await
    }

    async fn send_u_frame(&mut self, function: UFunction) -> Result<()> {
        self.write(Apdu::u_frame(function)).await
    }

    async fn send_s_frame(&mut self) -> Result<()> {
        self.write(Apdu::s_frame(self.recv_seq)).await?;
        self.unacked_recv = 0;
        Ok(())
    }

    /// Read and handle inbound frames until the send window has room.
    async fn wait_for_window(&mut self) -> Result<()> {
        while self.unacknowledged() >= self.k {
            let Some(apdu) = self.next_frame().await? else {
                return Err(Iec104Error::LinkClosed);
            };
            self.process(apdu).await?;
        }
        Ok(())
    }

    async fn write_i_frame(&mut self, payload: Bytes) -> Result<()> {
        let apdu = Apdu::i_frame_raw(self.send_seq, self.recv_seq, payload);
        self.write(apdu).await?;
        self.send_seq = seq_next(self.send_seq);
        // Our N(R) rode along with the I-frame
        self.unacked_recv = 0;
        Ok(())
    }

    /// Send an encoded ASDU, first waiting for room in the send window.
    /// Dropped if the peer stops the link while we wait.
    async fn send_i_frame(&mut self, payload: Bytes) -> Result<()> {
        self.wait_for_window().await?;
        if !self.started {
            log_warn!("Link stopped while waiting for the send window, dropping I-frame");
            return Ok(());
        }
        self.write_i_frame(payload).await
    }

    /// Send queued echoes. An entry leaves the outbox only once the window
    /// has room for it.
    async fn flush_outbox(&mut self) -> Result<()> {
        while !self.outbox.is_empty() {
            self.wait_for_window().await?;
            if !self.started {
                log_debug!("Link stopped, discarding {} queued replies", self.outbox.len());
                self.outbox.clear();
                break;
            }
            let Some(payload) = self.outbox.pop_front() else {
                break;
            };
            self.write_i_frame(payload).await?;
        }
        Ok(())
    }

    /// Peer acknowledged every I-frame before `recv_seq`.
    fn acknowledge(&mut self, recv_seq: u16) -> Result<()> {
        if seq_distance(self.ack_seq, recv_seq) > self.unacknowledged() {
            return Err(Iec104Error::Connection(format!(
                "Acknowledge of unsent I-frame (N(R)={}, V(S)={})",
                recv_seq, self.send_seq
            )));
        }
        self.ack_seq = recv_seq;
        Ok(())
    }

    /// Handle one inbound frame. Events for the session go to the backlog
    /// before anything is written, so none is lost if the caller is dropped
    /// mid-write.
    async fn process(&mut self, apdu: Apdu) -> Result<()> {
        match apdu.apci {
            Apci::UFrame { function } => {
                match function {
                    UFunction::StartDtAct => {
                        self.started = true;
                        self.backlog.push_back(LinkEvent::Active(true));
                    }
                    UFunction::StopDtAct => {
                        self.started = false;
                        self.backlog.push_back(LinkEvent::Active(false));
                        if self.unacked_recv > 0 {
                            self.send_s_frame().await?;
                        }
                    }
                    _ => {}
                }
                if let Some(confirmation) = function.confirmation() {
                    self.send_u_frame(confirmation).await?;
                }
            }

            Apci::SFrame { recv_seq } => self.acknowledge(recv_seq)?,

            Apci::IFrame { send_seq, recv_seq } => {
                self.acknowledge(recv_seq)?;

                if !self.started {
                    log_warn!("Dropping I-frame received before STARTDT");
                    return Ok(());
                }
                if send_seq != self.recv_seq {
                    return Err(Iec104Error::Connection(format!(
                        "Sequence mismatch: expected N(S)={}, got {}",
                        self.recv_seq, send_seq
                    )));
                }

                self.recv_seq = seq_next(self.recv_seq);
                self.unacked_recv += 1;

                let payload = apdu.payload.unwrap_or_default();
                match Asdu::decode(&payload) {
                    Ok(asdu) => self.backlog.push_back(LinkEvent::Asdu(asdu)),
                    Err(e) if e.is_answerable() => {
                        let cause = match e {
                            Iec104Error::UnknownTypeId(_) => Cot::UnknownTypeId,
                            _ => Cot::UnknownCot,
                        };
                        log_debug!("Rejecting ASDU: {}", e);
                        if let Some(reply) = negative_echo(&payload, cause) {
                            self.outbox.push_back(reply.freeze());
                        }
                    }
                    Err(e) => log_warn!("Dropping malformed ASDU: {}", e),
                }

                if self.unacked_recv >= self.w {
                    self.send_s_frame().await?;
                }
            }
        }
        Ok(())
    }
}

impl<S> Connection for ApciConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<LinkEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Ok(event);
            }
            self.flush_outbox().await?;

            match self.next_frame().await? {
                Some(apdu) => self.process(apdu).await?,
                None => return Ok(LinkEvent::Closed),
            }
        }
    }

    async fn send(&mut self, asdu: Asdu) -> Result<()> {
        if !self.started {
            log_warn!("Link not started, dropping {}", asdu);
            return Ok(());
        }
        self.send_i_frame(asdu.encode().freeze()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ioa, SingleCommand, TypeId};
    use std::time::Duration;
    use tokio_test::io::Builder;

    const STARTDT_ACT: [u8; 6] = [0x68, 0x04, 0x07, 0x00, 0x00, 0x00];
    const STARTDT_CON: [u8; 6] = [0x68, 0x04, 0x0B, 0x00, 0x00, 0x00];

    fn command_asdu(cot: Cot) -> Asdu {
        let mut asdu = Asdu::new(TypeId::SingleCommand, cot, 1);
        asdu.add_object(SingleCommand {
            ioa: Ioa::new(5000),
            state: true,
            select: false,
            qualifier: 0,
        })
        .unwrap();
        asdu
    }

    /// I-frame carrying `asdu` as raw bytes.
    fn i_frame(send_seq: u16, recv_seq: u16, asdu: &Asdu) -> Vec<u8> {
        let payload = asdu.encode();
        let mut frame = Apci::i_frame(send_seq, recv_seq)
            .encode_header(payload.len())
            .to_vec();
        frame.extend_from_slice(&payload);
        frame
    }

    #[tokio::test]
    async fn test_startdt_confirmed() {
        let mock = Builder::new().read(&STARTDT_ACT).write(&STARTDT_CON).build();
        let mut conn = ApciConnection::new(mock, 12, 8);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(true));
        assert!(conn.is_started());
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Closed);
    }

    #[tokio::test]
    async fn test_testfr_confirmed() {
        let mock = Builder::new()
            .read(&[0x68, 0x04, 0x43, 0x00, 0x00, 0x00])
            .write(&[0x68, 0x04, 0x83, 0x00, 0x00, 0x00])
            .build();
        let mut conn = ApciConnection::new(mock, 12, 8);

        // TESTFR is not reported to the session
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Closed);
    }

    #[tokio::test]
    async fn test_i_frame_before_startdt_dropped() {
        let mock = Builder::new()
            .read(&i_frame(0, 0, &command_asdu(Cot::Activation)))
            .build();
        let mut conn = ApciConnection::new(mock, 12, 8);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Closed);
    }

    #[tokio::test]
    async fn test_command_and_reply() {
        let request = command_asdu(Cot::Activation);
        let reply = request.reply(Cot::ActivationCon, false);

        let mock = Builder::new()
            .read(&STARTDT_ACT)
            .write(&STARTDT_CON)
            .read(&i_frame(0, 0, &request))
            // Reply piggy-backs N(R)=1
            .write(&[
                0x68, 0x0E, 0x00, 0x00, 0x02, 0x00, 45, 0x01, 0x07, 0x00, 0x01, 0x00, 0x88, 0x13,
                0x00, 0x01,
            ])
            .build();
        let mut conn = ApciConnection::new(mock, 12, 8);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(true));
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Asdu(request));
        conn.send(reply).await.unwrap();
        assert_eq!(conn.unacknowledged(), 1);
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Closed);
    }

    #[tokio::test]
    async fn test_acknowledge_after_w_frames() {
        let asdu = command_asdu(Cot::Activation);
        let mock = Builder::new()
            .read(&STARTDT_ACT)
            .write(&STARTDT_CON)
            .read(&i_frame(0, 0, &asdu))
            .read(&i_frame(1, 0, &asdu))
            // S-frame with N(R)=2
            .write(&[0x68, 0x04, 0x01, 0x00, 0x04, 0x00])
            .build();
        let mut conn = ApciConnection::new(mock, 12, 2);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(true));
        assert!(matches!(conn.receive().await.unwrap(), LinkEvent::Asdu(_)));
        assert!(matches!(conn.receive().await.unwrap(), LinkEvent::Asdu(_)));
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Closed);
    }

    #[tokio::test]
    async fn test_send_waits_for_window() {
        let request = command_asdu(Cot::Activation);
        let first = command_asdu(Cot::Spontaneous);
        let second = command_asdu(Cot::Periodic);

        let mock = Builder::new()
            .read(&STARTDT_ACT)
            .write(&STARTDT_CON)
            .write(&i_frame(0, 0, &first))
            // Peer sends a command that also acknowledges our frame
            .read(&i_frame(0, 1, &request))
            .write(&i_frame(1, 1, &second))
            .build();
        let mut conn = ApciConnection::new(mock, 1, 8);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(true));
        conn.send(first).await.unwrap();
        assert_eq!(conn.unacknowledged(), 1);
        conn.send(second).await.unwrap();

        // The command read while waiting is delivered afterwards
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Asdu(request));
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Closed);
    }

    #[tokio::test]
    async fn test_stopdt_while_waiting_for_window() {
        let first = command_asdu(Cot::Spontaneous);
        let mock = Builder::new()
            .read(&STARTDT_ACT)
            .write(&STARTDT_CON)
            .write(&i_frame(0, 0, &first))
            .read(&[0x68, 0x04, 0x13, 0x00, 0x00, 0x00])
            .write(&[0x68, 0x04, 0x23, 0x00, 0x00, 0x00])
            // S-frame acknowledging our frame opens the window
            .read(&[0x68, 0x04, 0x01, 0x00, 0x02, 0x00])
            .build();
        let mut conn = ApciConnection::new(mock, 1, 8);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(true));
        conn.send(first).await.unwrap();
        // No I-frame goes out once the link is stopped
        conn.send(command_asdu(Cot::Periodic)).await.unwrap();
        assert_eq!(conn.unacknowledged(), 0);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(false));
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_survives_cancelled_receive() {
        let first = command_asdu(Cot::Spontaneous);
        // M_ME_NA_1 (9) is not supported
        let inbound = [
            0x68, 0x10, 0x00, 0x00, 0x00, 0x00, 9, 0x01, 0x03, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ];
        let echo = [
            0x68, 0x10, 0x02, 0x00, 0x02, 0x00, 9, 0x01, 0x6C, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ];
        let mock = Builder::new()
            .read(&STARTDT_ACT)
            .write(&STARTDT_CON)
            .write(&i_frame(0, 0, &first))
            .read(&inbound)
            .wait(Duration::from_secs(10))
            .read(&[0x68, 0x04, 0x01, 0x00, 0x02, 0x00])
            .write(&echo)
            .build();
        let mut conn = ApciConnection::new(mock, 1, 8);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(true));
        conn.send(first).await.unwrap();

        // Window is full, so the echo waits; the caller gives up meanwhile
        let pending = tokio::time::timeout(Duration::from_secs(1), conn.receive()).await;
        assert!(pending.is_err());

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Closed);
    }

    #[tokio::test]
    async fn test_unknown_type_echoed_negative() {
        // M_ME_NA_1 (9) is not supported
        let inbound = [
            0x68, 0x10, 0x00, 0x00, 0x00, 0x00, 9, 0x01, 0x03, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ];
        let echo = [
            0x68, 0x10, 0x00, 0x00, 0x02, 0x00, 9, 0x01, 0x6C, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ];
        let mock = Builder::new()
            .read(&STARTDT_ACT)
            .write(&STARTDT_CON)
            .read(&inbound)
            .write(&echo)
            .build();
        let mut conn = ApciConnection::new(mock, 12, 8);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(true));
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Closed);
    }

    #[tokio::test]
    async fn test_stopdt_acknowledges_pending() {
        let mock = Builder::new()
            .read(&STARTDT_ACT)
            .write(&STARTDT_CON)
            .read(&i_frame(0, 0, &command_asdu(Cot::Activation)))
            .read(&[0x68, 0x04, 0x13, 0x00, 0x00, 0x00])
            .write(&[0x68, 0x04, 0x01, 0x00, 0x02, 0x00])
            .write(&[0x68, 0x04, 0x23, 0x00, 0x00, 0x00])
            .build();
        let mut conn = ApciConnection::new(mock, 12, 8);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(true));
        assert!(matches!(conn.receive().await.unwrap(), LinkEvent::Asdu(_)));
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(false));
        assert!(!conn.is_started());

        // Sending while stopped is a no-op
        conn.send(command_asdu(Cot::Spontaneous)).await.unwrap();
        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Closed);
    }

    #[tokio::test]
    async fn test_sequence_mismatch_is_link_error() {
        let mock = Builder::new()
            .read(&STARTDT_ACT)
            .write(&STARTDT_CON)
            .read(&i_frame(5, 0, &command_asdu(Cot::Activation)))
            .build();
        let mut conn = ApciConnection::new(mock, 12, 8);

        assert_eq!(conn.receive().await.unwrap(), LinkEvent::Active(true));
        let err = conn.receive().await.unwrap_err();
        assert!(err.is_link_error());
    }

    #[tokio::test]
    async fn test_bogus_acknowledge_is_link_error() {
        let mock = Builder::new()
            .read(&[0x68, 0x04, 0x01, 0x00, 0x0A, 0x00])
            .build();
        let mut conn = ApciConnection::new(mock, 12, 8);

        assert!(conn.receive().await.unwrap_err().is_link_error());
    }
}
