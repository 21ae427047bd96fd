use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Units accepted by the metrics backend. The serialized spelling is the
/// backend's own, so it must not be changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum StandardUnit {
    Seconds,
    Microseconds,
    Milliseconds,
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
    Bits,
    Kilobits,
    Megabits,
    Gigabits,
    Terabits,
    Percent,
    #[default]
    Count,
    #[serde(rename = "Bytes/Second")]
    BytesPerSecond,
    #[serde(rename = "Kilobytes/Second")]
    KilobytesPerSecond,
    #[serde(rename = "Megabytes/Second")]
    MegabytesPerSecond,
    #[serde(rename = "Gigabytes/Second")]
    GigabytesPerSecond,
    #[serde(rename = "Terabytes/Second")]
    TerabytesPerSecond,
    #[serde(rename = "Bits/Second")]
    BitsPerSecond,
    #[serde(rename = "Kilobits/Second")]
    KilobitsPerSecond,
    #[serde(rename = "Megabits/Second")]
    MegabitsPerSecond,
    #[serde(rename = "Gigabits/Second")]
    GigabitsPerSecond,
    #[serde(rename = "Terabits/Second")]
    TerabitsPerSecond,
    #[serde(rename = "Count/Second")]
    CountPerSecond,
    None,
}

impl StandardUnit {
    pub const ALL: [StandardUnit; 27] = [
        StandardUnit::Seconds,
        StandardUnit::Microseconds,
        StandardUnit::Milliseconds,
        StandardUnit::Bytes,
        StandardUnit::Kilobytes,
        StandardUnit::Megabytes,
        StandardUnit::Gigabytes,
        StandardUnit::Terabytes,
        StandardUnit::Bits,
        StandardUnit::Kilobits,
        StandardUnit::Megabits,
        StandardUnit::Gigabits,
        StandardUnit::Terabits,
        StandardUnit::Percent,
        StandardUnit::Count,
        StandardUnit::BytesPerSecond,
        StandardUnit::KilobytesPerSecond,
        StandardUnit::MegabytesPerSecond,
        StandardUnit::GigabytesPerSecond,
        StandardUnit::TerabytesPerSecond,
        StandardUnit::BitsPerSecond,
        StandardUnit::KilobitsPerSecond,
        StandardUnit::MegabitsPerSecond,
        StandardUnit::GigabitsPerSecond,
        StandardUnit::TerabitsPerSecond,
        StandardUnit::CountPerSecond,
        StandardUnit::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StandardUnit::Seconds => "Seconds",
            StandardUnit::Microseconds => "Microseconds",
            StandardUnit::Milliseconds => "Milliseconds",
            StandardUnit::Bytes => "Bytes",
            StandardUnit::Kilobytes => "Kilobytes",
            StandardUnit::Megabytes => "Megabytes",
            StandardUnit::Gigabytes => "Gigabytes",
            StandardUnit::Terabytes => "Terabytes",
            StandardUnit::Bits => "Bits",
            StandardUnit::Kilobits => "Kilobits",
            StandardUnit::Megabits => "Megabits",
            StandardUnit::Gigabits => "Gigabits",
            StandardUnit::Terabits => "Terabits",
            StandardUnit::Percent => "Percent",
            StandardUnit::Count => "Count",
            StandardUnit::BytesPerSecond => "Bytes/Second",
            StandardUnit::KilobytesPerSecond => "Kilobytes/Second",
            StandardUnit::MegabytesPerSecond => "Megabytes/Second",
            StandardUnit::GigabytesPerSecond => "Gigabytes/Second",
            StandardUnit::TerabytesPerSecond => "Terabytes/Second",
            StandardUnit::BitsPerSecond => "Bits/Second",
            StandardUnit::KilobitsPerSecond => "Kilobits/Second",
            StandardUnit::MegabitsPerSecond => "Megabits/Second",
            StandardUnit::GigabitsPerSecond => "Gigabits/Second",
            StandardUnit::TerabitsPerSecond => "Terabits/Second",
            StandardUnit::CountPerSecond => "Count/Second",
            StandardUnit::None => "None",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownUnit(pub String);

impl FromStr for StandardUnit {
    type Err = UnknownUnit;

    // Matching is case sensitive, the backend rejects any other spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StandardUnit::ALL
            .iter()
            .find(|unit| unit.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownUnit(s.to_string()))
    }
}

impl fmt::Display for StandardUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
