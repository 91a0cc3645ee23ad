//! Channel identity, units, and sample-value conversion.
//!
//! A channel is identified by a [`ChannelAddress`] (component id + channel
//! id) and carries a [`Unit`] that decides how its samples are aggregated and
//! bounded on disk. [`SampleValue`] converts concrete channel value types to
//! the `f64` storage representation, dispatched statically per type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Address of a channel: which component it belongs to and its id within
/// that component.
///
/// Addresses are cheap to clone and ordered, so they can key `BTreeMap`
/// query result tables directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelAddress {
    /// Id of the component the channel belongs to, e.g. `meter0`.
    pub component_id: String,
    /// Id of the channel within the component, e.g. `ActivePower`.
    pub channel_id: String,
}

impl ChannelAddress {
    /// Creates a new channel address.
    pub fn new(component_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component_id, self.channel_id)
    }
}

impl FromStr for ChannelAddress {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((component, channel)) if !component.is_empty() && !channel.is_empty() => {
                Ok(Self::new(component, channel))
            }
            _ => Err(format!("invalid channel address '{s}', expected 'component/channel'")),
        }
    }
}

/// Physical unit of a channel's values.
///
/// The unit determines the archive policy of the channel's database: bounded
/// vs. unbounded datasource, and `Average` vs. `Max` aggregation. Cumulative
/// units are monotonically increasing counters that are sampled, not
/// averaged, and written at most once per hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    /// No unit.
    None,
    /// Current in ampere.
    Ampere,
    /// Voltage in volt.
    Volt,
    /// Power in watt.
    Watt,
    /// Power in kilowatt.
    Kilowatt,
    /// Reactive power in volt-ampere reactive.
    VoltAmpereReactive,
    /// Frequency in hertz.
    Hertz,
    /// Temperature in degree Celsius.
    DegreeCelsius,
    /// Duration in seconds.
    Seconds,
    /// Duration in milliseconds.
    Milliseconds,
    /// Energy in watt-hours.
    WattHours,
    /// Energy in kilowatt-hours.
    KilowattHours,
    /// Ratio in percent, bounded to `[0, 100]`.
    Percent,
    /// Digital on/off signal, bounded to `[0, 1]`.
    OnOff,
    /// Monotonically increasing seconds counter.
    CumulatedSeconds,
    /// Monotonically increasing energy counter in watt-hours.
    CumulatedWattHours,
}

impl Unit {
    /// Returns whether this unit is a cumulative (monotonically increasing)
    /// counter.
    ///
    /// Cumulative channels are consolidated with `Max` and written once per
    /// hour instead of once per step.
    pub fn is_cumulative(self) -> bool {
        matches!(self, Self::CumulatedSeconds | Self::CumulatedWattHours)
    }
}

/// Priority tier deciding whether a channel is persisted at all.
///
/// The collector only persists channels whose priority is at or above the
/// configured minimum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum PersistencePriority {
    /// Never worth persisting locally.
    VeryLow,
    /// Low priority.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// High priority.
    High,
    /// Always persisted.
    VeryHigh,
}

/// Conversion of a concrete channel value type into the `f64` storage
/// representation.
///
/// Implemented once per value type and dispatched statically, replacing
/// runtime type switching at the ingest boundary. `None` means the channel
/// had no defined value at that instant.
pub trait SampleValue {
    /// Converts the value to an `f64` sample, or `None` if undefined.
    fn to_sample(&self) -> Option<f64>;
}

macro_rules! impl_sample_value_int {
    ($($t:ty),*) => {
        $(impl SampleValue for $t {
            #[allow(clippy::cast_precision_loss)] // storage representation is f64
            fn to_sample(&self) -> Option<f64> {
                Some(*self as f64)
            }
        })*
    };
}

impl_sample_value_int!(i16, u16, i32, u32, i64, u64);

impl SampleValue for f64 {
    fn to_sample(&self) -> Option<f64> {
        if self.is_nan() { None } else { Some(*self) }
    }
}

impl SampleValue for f32 {
    fn to_sample(&self) -> Option<f64> {
        if self.is_nan() { None } else { Some(f64::from(*self)) }
    }
}

impl SampleValue for bool {
    fn to_sample(&self) -> Option<f64> {
        Some(if *self { 1.0 } else { 0.0 })
    }
}

impl<T: SampleValue> SampleValue for Option<T> {
    fn to_sample(&self) -> Option<f64> {
        self.as_ref().and_then(SampleValue::to_sample)
    }
}

/// A single sample ready to be committed to a channel's database.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    /// Write timestamp in epoch seconds, already truncated to the step (or
    /// hour, for cumulative units).
    pub timestamp: i64,
    /// The channel this sample belongs to.
    pub address: ChannelAddress,
    /// The channel's unit, deciding the archive policy on lazy creation.
    pub unit: Unit,
    /// The aggregated sample value.
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_address_display_and_parse() {
        let addr = ChannelAddress::new("meter0", "ActivePower");
        assert_eq!(addr.to_string(), "meter0/ActivePower");
        assert_eq!("meter0/ActivePower".parse::<ChannelAddress>().unwrap(), addr);

        assert!("no-separator".parse::<ChannelAddress>().is_err());
        assert!("/Channel".parse::<ChannelAddress>().is_err());
        assert!("component/".parse::<ChannelAddress>().is_err());
    }

    #[test]
    fn test_cumulative_units() {
        assert!(Unit::CumulatedWattHours.is_cumulative());
        assert!(Unit::CumulatedSeconds.is_cumulative());
        assert!(!Unit::Watt.is_cumulative());
        assert!(!Unit::Percent.is_cumulative());
    }

    #[test]
    fn test_persistence_priority_ordering() {
        assert!(PersistencePriority::VeryLow < PersistencePriority::Medium);
        assert!(PersistencePriority::High >= PersistencePriority::Medium);
        assert_eq!(PersistencePriority::default(), PersistencePriority::Medium);
    }

    #[test]
    fn test_sample_value_conversion() {
        assert_eq!(42_i32.to_sample(), Some(42.0));
        assert_eq!(7_u64.to_sample(), Some(7.0));
        assert_eq!(true.to_sample(), Some(1.0));
        assert_eq!(false.to_sample(), Some(0.0));
        assert_eq!(1.5_f64.to_sample(), Some(1.5));
        assert_eq!(f64::NAN.to_sample(), None);
        assert_eq!(None::<i32>.to_sample(), None);
        assert_eq!(Some(3_i32).to_sample(), Some(3.0));
    }
}
