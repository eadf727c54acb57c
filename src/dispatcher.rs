//! Inbound ASDU dispatch.
//!
//! Every inbound ASDU goes to exactly one handler category, chosen by its
//! type identification:
//!
//! | Type      | Category                                   |
//! |-----------|--------------------------------------------|
//! | C_CS_NA_1 | [`StationHandler::on_clock_sync`]          |
//! | C_IC_NA_1 | [`StationHandler::on_interrogation`]       |
//! | C_CI_NA_1 | [`StationHandler::on_counter_interrogation`] |
//! | C_RD_NA_1 | [`StationHandler::on_read`]                |
//! | other     | [`StationHandler::on_asdu`]                |
//!
//! Handlers answer through a [`Responder`]; the session sends the collected
//! replies in push order before it reads the next inbound ASDU.

use std::sync::Arc;

use crate::config::{BROADCAST_ADDRESS, DEFAULT_COMMON_ADDRESS};
use crate::macros::{log_debug, log_warn};
use crate::types::{Asdu, Cot, Cp56Time2a, InformationObject, Ioa, TypeId};

/// Reply sink handed to handlers.
///
/// Carries the station's common address: data ASDUs are stamped with it and
/// replies to a broadcast request carry it instead of the broadcast address.
#[derive(Debug)]
pub struct Responder {
    common_address: u16,
    replies: Vec<Asdu>,
}

impl Responder {
    pub fn new(common_address: u16) -> Self {
        Self {
            common_address,
            replies: Vec::new(),
        }
    }

    /// Common address of the answering station.
    #[inline]
    pub fn common_address(&self) -> u16 {
        self.common_address
    }

    /// Copy of `request` with a new cause and P/N flag, addressed from this
    /// station.
    pub fn reply_to(&self, request: &Asdu, cot: Cot, negative: bool) -> Asdu {
        let mut reply = request.reply(cot, negative);
        if request.common_address() == BROADCAST_ADDRESS {
            reply.set_common_address(self.common_address);
        }
        reply
    }

    /// Queue an ASDU for sending.
    pub fn send_asdu(&mut self, asdu: Asdu) {
        self.replies.push(asdu);
    }

    /// Confirm `request` with ACTIVATION_CON.
    pub fn send_act_con(&mut self, request: &Asdu, negative: bool) {
        let reply = self.reply_to(request, Cot::ActivationCon, negative);
        self.send_asdu(reply);
    }

    /// Terminate `request` with ACTIVATION_TERM.
    pub fn send_act_term(&mut self, request: &Asdu) {
        let reply = self.reply_to(request, Cot::ActivationTerm, false);
        self.send_asdu(reply);
    }

    /// Echo `request` negatively with an error cause.
    pub fn send_error(&mut self, request: &Asdu, cause: Cot) {
        debug_assert!(cause.is_error(), "{} is not an error cause", cause);
        let reply = self.reply_to(request, cause, true);
        self.send_asdu(reply);
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// Take all collected replies, oldest first.
    pub fn drain(&mut self) -> std::vec::Drain<'_, Asdu> {
        self.replies.drain(..)
    }
}

impl Default for Responder {
    fn default() -> Self {
        Self::new(DEFAULT_COMMON_ADDRESS)
    }
}

/// Station behavior, one method per handler category.
///
/// Every method returns whether the ASDU was handled. The defaults return
/// `false`, which is the same as having no handler registered for that
/// category.
pub trait StationHandler: Send + Sync {
    /// C_CS_NA_1 with the decoded time.
    ///
    /// Returns whether the time was accepted, or `None` without a clock
    /// handler. Clock synchronization has no reply ASDU either way.
    fn on_clock_sync(
        &self,
        _responder: &mut Responder,
        _asdu: &Asdu,
        _time: Cp56Time2a,
    ) -> Option<bool> {
        None
    }

    /// C_IC_NA_1 with its qualifier of interrogation.
    fn on_interrogation(&self, _responder: &mut Responder, _asdu: &Asdu, _qoi: u8) -> bool {
        false
    }

    /// C_CI_NA_1 with its qualifier of counter interrogation.
    fn on_counter_interrogation(&self, _responder: &mut Responder, _asdu: &Asdu, _qcc: u8) -> bool {
        false
    }

    /// C_RD_NA_1 for a single address.
    fn on_read(&self, _responder: &mut Responder, _asdu: &Asdu, _ioa: Ioa) -> bool {
        false
    }

    /// Any other ASDU.
    fn on_asdu(&self, _responder: &mut Responder, _asdu: &Asdu) -> bool {
        false
    }
}

pub type ClockSyncHandler = Box<dyn Fn(&mut Responder, &Asdu, Cp56Time2a) -> bool + Send + Sync>;
pub type QualifierHandler = Box<dyn Fn(&mut Responder, &Asdu, u8) -> bool + Send + Sync>;
pub type ReadHandler = Box<dyn Fn(&mut Responder, &Asdu, Ioa) -> bool + Send + Sync>;
pub type AsduHandler = Box<dyn Fn(&mut Responder, &Asdu) -> bool + Send + Sync>;

/// Closure-backed [`StationHandler`].
///
/// State a handler needs is captured by its closure.
///
/// ```rust,ignore
/// let mut handlers = Handlers::new();
/// handlers.set_interrogation_handler(|responder, asdu, _qoi| {
///     responder.send_act_con(asdu, false);
///     responder.send_act_term(asdu);
///     true
/// });
/// let station = Station::new(StationConfig::default(), Arc::new(handlers));
/// ```
#[derive(Default)]
pub struct Handlers {
    clock_sync: Option<ClockSyncHandler>,
    interrogation: Option<QualifierHandler>,
    counter_interrogation: Option<QualifierHandler>,
    read: Option<ReadHandler>,
    asdu: Option<AsduHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_clock_sync_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut Responder, &Asdu, Cp56Time2a) -> bool + Send + Sync + 'static,
    {
        self.clock_sync = Some(Box::new(handler));
    }

    pub fn set_interrogation_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut Responder, &Asdu, u8) -> bool + Send + Sync + 'static,
    {
        self.interrogation = Some(Box::new(handler));
    }

    pub fn set_counter_interrogation_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut Responder, &Asdu, u8) -> bool + Send + Sync + 'static,
    {
        self.counter_interrogation = Some(Box::new(handler));
    }

    pub fn set_read_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut Responder, &Asdu, Ioa) -> bool + Send + Sync + 'static,
    {
        self.read = Some(Box::new(handler));
    }

    pub fn set_asdu_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut Responder, &Asdu) -> bool + Send + Sync + 'static,
    {
        self.asdu = Some(Box::new(handler));
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("clock_sync", &self.clock_sync.is_some())
            .field("interrogation", &self.interrogation.is_some())
            .field("counter_interrogation", &self.counter_interrogation.is_some())
            .field("read", &self.read.is_some())
            .field("asdu", &self.asdu.is_some())
            .finish()
    }
}

impl StationHandler for Handlers {
    fn on_clock_sync(
        &self,
        responder: &mut Responder,
        asdu: &Asdu,
        time: Cp56Time2a,
    ) -> Option<bool> {
        self.clock_sync.as_ref().map(|h| h(responder, asdu, time))
    }

    fn on_interrogation(&self, responder: &mut Responder, asdu: &Asdu, qoi: u8) -> bool {
        self.interrogation
            .as_ref()
            .is_some_and(|h| h(responder, asdu, qoi))
    }

    fn on_counter_interrogation(&self, responder: &mut Responder, asdu: &Asdu, qcc: u8) -> bool {
        self.counter_interrogation
            .as_ref()
            .is_some_and(|h| h(responder, asdu, qcc))
    }

    fn on_read(&self, responder: &mut Responder, asdu: &Asdu, ioa: Ioa) -> bool {
        self.read.as_ref().is_some_and(|h| h(responder, asdu, ioa))
    }

    fn on_asdu(&self, responder: &mut Responder, asdu: &Asdu) -> bool {
        self.asdu.as_ref().is_some_and(|h| h(responder, asdu))
    }
}

/// Routes inbound ASDUs to a [`StationHandler`].
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn StationHandler>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn StationHandler>) -> Self {
        Self { handler }
    }

    /// Dispatch one inbound ASDU. Returns whether a handler took it.
    ///
    /// A system command whose first object is missing counts as unhandled.
    pub fn handle_inbound(&self, responder: &mut Responder, asdu: &Asdu) -> bool {
        let handled = match (asdu.type_id(), asdu.first_object()) {
            (TypeId::ClockSync, Some(InformationObject::ClockSync(cs))) => {
                match self.handler.on_clock_sync(responder, asdu, cs.time) {
                    Some(accepted) => {
                        if !accepted {
                            log_warn!("Clock synchronization to {} rejected", cs.time);
                        }
                        true
                    }
                    None => false,
                }
            }
            (TypeId::InterrogationCommand, Some(InformationObject::Interrogation(ic))) => {
                self.handler.on_interrogation(responder, asdu, ic.qoi)
            }
            (TypeId::CounterInterrogation, Some(InformationObject::CounterInterrogation(ci))) => {
                self.handler.on_counter_interrogation(responder, asdu, ci.qcc)
            }
            (TypeId::ReadCommand, Some(InformationObject::Read(rd))) => {
                self.handler.on_read(responder, asdu, rd.ioa)
            }
            (
                TypeId::ClockSync
                | TypeId::InterrogationCommand
                | TypeId::CounterInterrogation
                | TypeId::ReadCommand,
                _,
            ) => false,
            _ => self.handler.on_asdu(responder, asdu),
        };

        log_debug!(
            "Dispatched {} handled={} replies={}",
            asdu,
            handled,
            responder.len()
        );
        handled
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
