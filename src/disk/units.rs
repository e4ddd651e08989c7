use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size unit accepted for partition deltas and growth targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Unit {
    /// Raw device sectors.
    Sector,
    Byte,
    KB,
    MB,
    GB,
    KiB,
    #[default]
    MiB,
    GiB,
}

impl Unit {
    /// Bytes per unit, or `None` for sectors whose size depends on the device.
    pub fn bytes(self) -> Option<u64> {
        match self {
            Unit::Sector => None,
            Unit::Byte => Some(1),
            Unit::KB => Some(1000),
            Unit::MB => Some(1000 * 1000),
            Unit::GB => Some(1000 * 1000 * 1000),
            Unit::KiB => Some(1024),
            Unit::MiB => Some(1024 * 1024),
            Unit::GiB => Some(1024 * 1024 * 1024),
        }
    }

    fn bytes_for(self, sector_size: u64) -> u64 {
        self.bytes().unwrap_or(sector_size)
    }
}

impl FromStr for Unit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let unit = match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sector" | "sectors" => Unit::Sector,
            "b" => Unit::Byte,
            "kb" => Unit::KB,
            "mb" => Unit::MB,
            "gb" => Unit::GB,
            "kib" => Unit::KiB,
            "mib" => Unit::MiB,
            "gib" => Unit::GiB,
            _ => bail!("invalid unit: {s}"),
        };
        Ok(unit)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Unit::Sector => "s",
            Unit::Byte => "B",
            Unit::KB => "kB",
            Unit::MB => "MB",
            Unit::GB => "GB",
            Unit::KiB => "KiB",
            Unit::MiB => "MiB",
            Unit::GiB => "GiB",
        };
        f.write_str(s)
    }
}

/// Convert `amount` of `unit` into a signed sector count.
///
/// Rounds toward positive infinity, so a positive delta never comes out
/// smaller than requested and a negative one never shrinks more than asked.
pub fn to_sector_delta(amount: i64, unit: Unit, sector_size: u64) -> Result<i64> {
    if sector_size == 0 {
        bail!("sector size must be non-zero");
    }
    let unit_bytes = i128::from(unit.bytes_for(sector_size));
    let sector_size = i128::from(sector_size);
    let bytes = i128::from(amount) * unit_bytes;
    let sectors = bytes.div_euclid(sector_size) + i128::from(bytes.rem_euclid(sector_size) != 0);
    i64::try_from(sectors).map_err(|_| anyhow!("sector delta out of range: {amount}{unit}"))
}

/// Start/end sector extent of a partition. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub start: u64,
    pub end: u64,
}

impl Geometry {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            bail!("invalid geometry: start {start} > end {end}");
        }
        Ok(Self { start, end })
    }

    /// Length in sectors.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Length expressed in `unit`, truncated.
    pub fn length_in(&self, unit: Unit, sector_size: u64) -> u64 {
        self.length() * sector_size / unit.bytes_for(sector_size)
    }

    pub fn length_bytes(&self, sector_size: u64) -> u64 {
        self.length() * sector_size
    }

    /// New geometry with each bound moved independently.
    pub fn shifted(&self, delta_start: i64, delta_end: i64) -> Result<Self> {
        let start = self
            .start
            .checked_add_signed(delta_start)
            .ok_or_else(|| anyhow!("start sector {} {delta_start:+} out of range", self.start))?;
        let end = self
            .end
            .checked_add_signed(delta_end)
            .ok_or_else(|| anyhow!("end sector {} {delta_end:+} out of range", self.end))?;
        Self::new(start, end)
    }

    pub fn overlaps(&self, other: &Geometry) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={} ({} sectors)", self.start, self.end, self.length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mib_to_sectors() {
        assert_eq!(to_sector_delta(64, Unit::MiB, 512).unwrap(), 131072);
        assert_eq!(to_sector_delta(-8, Unit::MiB, 512).unwrap(), -16384);
        assert_eq!(to_sector_delta(1, Unit::MiB, 4096).unwrap(), 256);
        assert_eq!(to_sector_delta(0, Unit::GiB, 512).unwrap(), 0);
    }

    #[test]
    fn partial_sectors_round_up() {
        assert_eq!(to_sector_delta(1, Unit::Byte, 512).unwrap(), 1);
        assert_eq!(to_sector_delta(513, Unit::Byte, 512).unwrap(), 2);
        assert_eq!(to_sector_delta(-513, Unit::Byte, 512).unwrap(), -1);
        assert_eq!(to_sector_delta(1, Unit::KB, 512).unwrap(), 2);
    }

    #[test]
    fn sector_unit_is_identity() {
        assert_eq!(to_sector_delta(-7, Unit::Sector, 4096).unwrap(), -7);
        assert!(to_sector_delta(1, Unit::Sector, 0).is_err());
    }

    #[test]
    fn parse_units() {
        assert_eq!("MiB".parse::<Unit>().unwrap(), Unit::MiB);
        assert_eq!("gib".parse::<Unit>().unwrap(), Unit::GiB);
        assert_eq!("s".parse::<Unit>().unwrap(), Unit::Sector);
        assert!("parsecs".parse::<Unit>().is_err());
    }

    #[test]
    fn geometry_shift_both_ends() {
        let g = Geometry::new(2048, 4095).unwrap();
        assert_eq!(g.length(), 2048);
        assert_eq!(g.shifted(0, 0).unwrap(), g);
        let moved = g.shifted(1024, -512).unwrap();
        assert_eq!(moved, Geometry { start: 3072, end: 3583 });
        assert!(g.shifted(-4096, 0).is_err());
        assert!(g.shifted(2048, 0).is_err());
    }

    #[test]
    fn geometry_length_in_units() {
        let g = Geometry::new(2048, 2048 + 3 * 2048 - 1).unwrap();
        assert_eq!(g.length_in(Unit::MiB, 512), 3);
        assert_eq!(g.length_in(Unit::KiB, 512), 3072);
        let ragged = Geometry::new(0, 2048 + 100).unwrap();
        assert_eq!(ragged.length_in(Unit::MiB, 512), 1);
    }

    #[test]
    fn overlap_is_inclusive() {
        let a = Geometry::new(0, 99).unwrap();
        assert!(a.overlaps(&Geometry::new(99, 200).unwrap()));
        assert!(!a.overlaps(&Geometry::new(100, 200).unwrap()));
    }
}
