//! Process image and the outstation's standard request handling.
//!
//! [`ProcessHandler`] answers clock synchronization, station and counter
//! interrogation, read and single commands from a [`ProcessImage`].

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, RwLock};

use crate::dispatcher::{Responder, StationHandler};
use crate::macros::{log_debug, log_info, log_warn};
use crate::types::{
    Asdu, BinaryCounterReading, Cot, Cp56Time2a, InformationObject, IntegratedTotalsWithTime,
    Ioa, MeasuredValueScaled, Quality, SingleCommand, SinglePointInformation,
    SinglePointWithTime, TypeId, QCC_GENERAL, QOI_STATION,
};

/// Current values reported by the outstation.
///
/// Each point kind is reported with its own type:
///
/// | Kind             | Interrogation / read | Read only  |
/// |------------------|----------------------|------------|
/// | scaled           | M_ME_NB_1            |            |
/// | single point     | M_SP_TB_1            |            |
/// | counter          | M_IT_TB_1            |            |
/// | controllable     |                      | M_SP_NA_1  |
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessImage {
    scaled: BTreeMap<Ioa, (i16, Quality)>,
    single_points: BTreeMap<Ioa, (bool, Quality)>,
    counters: BTreeMap<Ioa, BinaryCounterReading>,
    controls: BTreeMap<Ioa, bool>,
}

impl ProcessImage {
    /// An image without any points.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reference station: three scaled values, two single points, one
    /// invalid counter and one controllable switch.
    pub fn reference() -> Self {
        Self::empty()
            .with_scaled(100, -1)
            .with_scaled(101, 23)
            .with_scaled(102, 2300)
            .with_single_point(104, true)
            .with_single_point(105, false)
            .with_counter(200, BinaryCounterReading::new(12_345_678, 0, false, false, true))
            .with_control(5000)
    }

    pub fn with_scaled(mut self, ioa: u32, value: i16) -> Self {
        self.scaled.insert(Ioa::new(ioa), (value, Quality::GOOD));
        self
    }

    pub fn with_single_point(mut self, ioa: u32, value: bool) -> Self {
        self.single_points.insert(Ioa::new(ioa), (value, Quality::GOOD));
        self
    }

    pub fn with_counter(mut self, ioa: u32, reading: BinaryCounterReading) -> Self {
        self.counters.insert(Ioa::new(ioa), reading);
        self
    }

    /// Add a point that accepts single commands (initially off).
    pub fn with_control(mut self, ioa: u32) -> Self {
        self.controls.insert(Ioa::new(ioa), false);
        self
    }

    /// Update a scaled value. Returns false for an unknown address.
    pub fn set_scaled(&mut self, ioa: Ioa, value: i16, quality: Quality) -> bool {
        match self.scaled.get_mut(&ioa) {
            Some(slot) => {
                *slot = (value, quality);
                true
            }
            None => false,
        }
    }

    /// Update a single point. Returns false for an unknown address.
    /// Overflow is not reported for single points and is cleared.
    pub fn set_single_point(&mut self, ioa: Ioa, value: bool, quality: Quality) -> bool {
        match self.single_points.get_mut(&ioa) {
            Some(slot) => {
                *slot = (value, quality.for_siq());
                true
            }
            None => false,
        }
    }

    /// Update a counter. Returns false for an unknown address.
    pub fn set_counter(&mut self, ioa: Ioa, reading: BinaryCounterReading) -> bool {
        match self.counters.get_mut(&ioa) {
            Some(slot) => {
                *slot = reading;
                true
            }
            None => false,
        }
    }

    /// State of a controllable point.
    pub fn control_state(&self, ioa: Ioa) -> Option<bool> {
        self.controls.get(&ioa).copied()
    }

    pub fn is_controllable(&self, ioa: Ioa) -> bool {
        self.controls.contains_key(&ioa)
    }

    /// Apply a single command. A select only checks the address.
    /// Returns false for an address that is not controllable.
    pub fn apply_command(&mut self, command: &SingleCommand) -> bool {
        match self.controls.get_mut(&command.ioa) {
            Some(state) => {
                if !command.select {
                    *state = command.state;
                }
                true
            }
            None => false,
        }
    }

    pub fn scaled_objects(&self) -> impl Iterator<Item = InformationObject> + '_ {
        self.scaled.iter().map(|(&ioa, &(value, quality))| {
            MeasuredValueScaled { ioa, value, quality }.into()
        })
    }

    pub fn single_point_objects(
        &self,
        timestamp: Cp56Time2a,
    ) -> impl Iterator<Item = InformationObject> + '_ {
        self.single_points
            .iter()
            .map(move |(&ioa, &(value, quality))| {
                SinglePointWithTime {
                    ioa,
                    value,
                    quality,
                    timestamp,
                }
                .into()
            })
    }

    pub fn counter_objects(
        &self,
        timestamp: Cp56Time2a,
    ) -> impl Iterator<Item = InformationObject> + '_ {
        self.counters.iter().map(move |(&ioa, &reading)| {
            IntegratedTotalsWithTime {
                ioa,
                reading,
                timestamp,
            }
            .into()
        })
    }

    /// Current value of any point, as the object a read reply carries.
    pub fn read(&self, ioa: Ioa, timestamp: Cp56Time2a) -> Option<InformationObject> {
        if let Some(&(value, quality)) = self.scaled.get(&ioa) {
            return Some(MeasuredValueScaled { ioa, value, quality }.into());
        }
        if let Some(&(value, quality)) = self.single_points.get(&ioa) {
            return Some(
                SinglePointWithTime {
                    ioa,
                    value,
                    quality,
                    timestamp,
                }
                .into(),
            );
        }
        if let Some(&reading) = self.counters.get(&ioa) {
            return Some(
                IntegratedTotalsWithTime {
                    ioa,
                    reading,
                    timestamp,
                }
                .into(),
            );
        }
        self.controls.get(&ioa).map(|&value| {
            SinglePointInformation {
                ioa,
                value,
                quality: Quality::GOOD,
            }
            .into()
        })
    }
}

/// Standard outstation behavior over a shared [`ProcessImage`].
#[derive(Debug)]
pub struct ProcessHandler {
    image: RwLock<ProcessImage>,
    last_clock_sync: Mutex<Option<Cp56Time2a>>,
}

impl ProcessHandler {
    pub fn new(image: ProcessImage) -> Self {
        Self {
            image: RwLock::new(image),
            last_clock_sync: Mutex::new(None),
        }
    }

    /// Time of the most recent clock synchronization.
    pub fn last_clock_sync(&self) -> Option<Cp56Time2a> {
        *self
            .last_clock_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with read access to the image.
    pub fn with_image<R>(&self, f: impl FnOnce(&ProcessImage) -> R) -> R {
        let image = self.image.read().unwrap_or_else(PoisonError::into_inner);
        f(&image)
    }

    /// Run `f` with write access to the image.
    pub fn update_image<R>(&self, f: impl FnOnce(&mut ProcessImage) -> R) -> R {
        let mut image = self.image.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut image)
    }
}

impl Default for ProcessHandler {
    fn default() -> Self {
        Self::new(ProcessImage::reference())
    }
}

/// Pack `objects` of one type into as few ASDUs as possible.
fn send_batched(
    responder: &mut Responder,
    type_id: TypeId,
    cot: Cot,
    common_address: u16,
    objects: impl IntoIterator<Item = InformationObject>,
) {
    let mut asdu = Asdu::new(type_id, cot, common_address);
    for object in objects {
        if !asdu.has_room() {
            let full = std::mem::replace(&mut asdu, Asdu::new(type_id, cot, common_address));
            responder.send_asdu(full);
        }
        if let Err(e) = asdu.add_object(object) {
            log_warn!("Dropping {} object: {}", type_id, e);
        }
    }
    if !asdu.is_empty() {
        responder.send_asdu(asdu);
    }
}

impl StationHandler for ProcessHandler {
    fn on_clock_sync(
        &self,
        _responder: &mut Responder,
        _asdu: &Asdu,
        time: Cp56Time2a,
    ) -> Option<bool> {
        // Invalid flag set or not a calendar date
        if time.to_datetime().is_none() {
            return Some(false);
        }

        log_info!("Clock synchronization to {}", time);
        *self
            .last_clock_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(time);
        Some(true)
    }

    fn on_interrogation(&self, responder: &mut Responder, asdu: &Asdu, qoi: u8) -> bool {
        log_info!("Interrogation for group {}", qoi);

        if asdu.cot() != Cot::Activation {
            responder.send_error(asdu, Cot::UnknownCot);
            return true;
        }
        let Some(cot) = Cot::for_interrogation(qoi) else {
            responder.send_act_con(asdu, true);
            return true;
        };

        responder.send_act_con(asdu, false);

        if qoi == QOI_STATION {
            let timestamp = Cp56Time2a::now();
            let ca = responder.common_address();
            self.with_image(|image| {
                send_batched(responder, TypeId::MeasuredScaled, cot, ca, image.scaled_objects());
                send_batched(
                    responder,
                    TypeId::SinglePointTime56,
                    cot,
                    ca,
                    image.single_point_objects(timestamp),
                );
                send_batched(
                    responder,
                    TypeId::IntegratedTotalsTime56,
                    cot,
                    ca,
                    image.counter_objects(timestamp),
                );
            });
        }

        responder.send_act_term(asdu);
        true
    }

    fn on_counter_interrogation(&self, responder: &mut Responder, asdu: &Asdu, qcc: u8) -> bool {
        log_info!("Counter interrogation with QCC {}", qcc);

        if asdu.cot() != Cot::Activation {
            responder.send_error(asdu, Cot::UnknownCot);
            return true;
        }

        // Freeze/reset bits (FRZ) are accepted but counters are not frozen
        let request = qcc & 0x3F;
        if !(1..=QCC_GENERAL).contains(&request) {
            responder.send_act_con(asdu, true);
            return true;
        }

        responder.send_act_con(asdu, false);

        if request == QCC_GENERAL {
            let timestamp = Cp56Time2a::now();
            let ca = responder.common_address();
            self.with_image(|image| {
                send_batched(
                    responder,
                    TypeId::IntegratedTotalsTime56,
                    Cot::RequestedByGeneralCounter,
                    ca,
                    image.counter_objects(timestamp),
                );
            });
        }

        responder.send_act_term(asdu);
        true
    }

    fn on_read(&self, responder: &mut Responder, asdu: &Asdu, ioa: Ioa) -> bool {
        let object = self.with_image(|image| image.read(ioa, Cp56Time2a::now()));
        match object {
            Some(object) => {
                let mut reply =
                    Asdu::new(object.type_id(), Cot::Request, responder.common_address());
                match reply.add_object(object) {
                    Ok(()) => responder.send_asdu(reply),
                    Err(e) => log_warn!("Read of {} failed: {}", ioa, e),
                }
            }
            None => {
                log_debug!("Read of unknown IOA {}", ioa);
                responder.send_error(asdu, Cot::UnknownIoa);
            }
        }
        true
    }

    fn on_asdu(&self, responder: &mut Responder, asdu: &Asdu) -> bool {
        if asdu.type_id() != TypeId::SingleCommand {
            return false;
        }

        if asdu.cot() != Cot::Activation {
            responder.send_error(asdu, Cot::UnknownCot);
            return true;
        }

        // Only the first element of a command ASDU is executed
        let Some(InformationObject::SingleCommand(command)) = asdu.first_object() else {
            responder.send_error(asdu, Cot::UnknownIoa);
            return true;
        };

        if self.update_image(|image| image.apply_command(command)) {
            log_info!(
                "IOA {} switch to {} ({})",
                command.ioa,
                command.state,
                if command.select { "select" } else { "execute" }
            );
            responder.send_act_con(asdu, false);
        } else {
            log_debug!("Single command for unknown IOA {}", command.ioa);
            responder.send_error(asdu, Cot::UnknownIoa);
        }
        true
    }
}
