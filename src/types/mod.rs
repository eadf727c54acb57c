//! IEC 60870-5-104 type definitions.
//!
//! This module contains all the core types for the IEC 104 protocol:
//!
//! - `TypeId` - Type identification (M_SP_NA_1, etc.)
//! - `Cot` - Cause of transmission
//! - `Apci` - Application Protocol Control Information
//! - `Asdu` - Application Service Data Unit
//! - `InformationObject` - Typed information objects
//! - `Quality` - Quality descriptor flags
//! - `Cp56Time2a` - Absolute time tag

mod apci;
mod asdu;
mod cot;
mod object;
mod quality;
mod time;
mod type_id;

pub use apci::*;
pub use asdu::*;
pub use cot::*;
pub use object::*;
pub use quality::*;
pub use time::*;
pub use type_id::*;
