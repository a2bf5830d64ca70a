//! Synthetic GRIB2 fixtures for integration tests.
//!
//! Builds minimal but spec-conformant single-field messages: lat/lon grid
//! (template 3.0), forecast at a horizontal level (template 4.0), simple
//! packing (template 5.0), no bitmap. Several messages concatenated into
//! one file form a multi-variable, multi-step dataset.

use byteorder::{BigEndian, WriteBytesExt};
use std::path::{Path, PathBuf};

pub struct MessageBuilder {
    discipline: u8,
    centre: u16,
    param_category: u8,
    param_number: u8,
    level_type: u8,
    level_value: u32,
    forecast_hour: u32,
    ni: u32,
    nj: u32,
    la1_micro: i32,
    lo1_micro: i32,
    d_micro: u32,
    data: FieldData,
}

enum FieldData {
    /// nbit = 0: every point decodes to exactly this reference value.
    Constant(f32),
    /// 16-bit simple packing.
    Values(Vec<f32>),
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self {
            discipline: 0,
            centre: 34,
            param_category: 0,
            param_number: 0, // Temperature
            level_type: 103, // height above ground
            level_value: 2,
            forecast_hour: 0,
            ni: 4,
            nj: 3,
            la1_micro: 40_000_000,
            lo1_micro: 10_000_000,
            d_micro: 1_000_000, // 1 degree
            data: FieldData::Constant(288.15),
        }
    }

    pub fn parameter(mut self, category: u8, number: u8) -> Self {
        self.param_category = category;
        self.param_number = number;
        self
    }

    pub fn level(mut self, level_type: u8, level_value: u32) -> Self {
        self.level_type = level_type;
        self.level_value = level_value;
        self
    }

    pub fn forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    pub fn grid(mut self, ni: u32, nj: u32) -> Self {
        self.ni = ni;
        self.nj = nj;
        self
    }

    /// First grid point, in microdegrees.
    pub fn origin(mut self, la1_micro: i32, lo1_micro: i32) -> Self {
        self.la1_micro = la1_micro;
        self.lo1_micro = lo1_micro;
        self
    }

    pub fn constant_value(mut self, value: f32) -> Self {
        self.data = FieldData::Constant(value);
        self
    }

    pub fn values(mut self, values: Vec<f32>) -> Self {
        assert_eq!(values.len(), (self.ni * self.nj) as usize);
        self.data = FieldData::Values(values);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let section1 = self.section1();
        let section3 = self.section3();
        let section4 = self.section4();
        let section5 = self.section5();
        let section6 = self.section6();
        let section7 = self.section7();

        let total = 16
            + section1.len()
            + section3.len()
            + section4.len()
            + section5.len()
            + section6.len()
            + section7.len()
            + 4;

        let mut message = Vec::with_capacity(total);
        message.extend_from_slice(b"GRIB");
        message.write_u16::<BigEndian>(0).unwrap(); // reserved
        message.write_u8(self.discipline).unwrap();
        message.write_u8(2).unwrap(); // edition
        message.write_u64::<BigEndian>(total as u64).unwrap();

        message.extend_from_slice(&section1);
        message.extend_from_slice(&section3);
        message.extend_from_slice(&section4);
        message.extend_from_slice(&section5);
        message.extend_from_slice(&section6);
        message.extend_from_slice(&section7);
        message.extend_from_slice(b"7777");
        message
    }

    fn section1(&self) -> Vec<u8> {
        let mut s = Vec::new();
        s.write_u32::<BigEndian>(21).unwrap();
        s.write_u8(1).unwrap();
        s.write_u16::<BigEndian>(self.centre).unwrap();
        s.write_u16::<BigEndian>(0).unwrap(); // sub-centre
        s.write_u8(2).unwrap(); // master tables version
        s.write_u8(1).unwrap(); // local tables version
        s.write_u8(1).unwrap(); // reference time = start of forecast
        s.write_u16::<BigEndian>(2026).unwrap();
        s.write_u8(1).unwrap(); // month
        s.write_u8(15).unwrap(); // day
        s.write_u8(12).unwrap(); // hour
        s.write_u8(0).unwrap(); // minute
        s.write_u8(0).unwrap(); // second
        s.write_u8(0).unwrap(); // production status
        s.write_u8(1).unwrap(); // type of data = forecast
        s
    }

    fn section3(&self) -> Vec<u8> {
        // Grid definition template 3.0, latitude/longitude.
        let la2 = self.la1_micro - (self.nj as i32 - 1) * self.d_micro as i32;
        let lo2 = self.lo1_micro + (self.ni as i32 - 1) * self.d_micro as i32;

        let mut s = Vec::new();
        s.write_u32::<BigEndian>(14 + 58).unwrap();
        s.write_u8(3).unwrap();
        s.write_u8(0).unwrap(); // source of grid definition
        s.write_u32::<BigEndian>(self.ni * self.nj).unwrap();
        s.write_u8(0).unwrap(); // no optional list
        s.write_u8(0).unwrap();
        s.write_u16::<BigEndian>(0).unwrap(); // template 3.0

        s.write_u8(6).unwrap(); // spherical earth, radius 6371229 m
        s.write_u8(0).unwrap();
        s.write_u32::<BigEndian>(0).unwrap();
        s.write_u8(0).unwrap();
        s.write_u32::<BigEndian>(0).unwrap();
        s.write_u8(0).unwrap();
        s.write_u32::<BigEndian>(0).unwrap();
        s.write_u32::<BigEndian>(self.ni).unwrap();
        s.write_u32::<BigEndian>(self.nj).unwrap();
        s.write_u32::<BigEndian>(0).unwrap(); // basic angle
        s.write_u32::<BigEndian>(0xFFFF_FFFF).unwrap(); // subdivisions
        s.write_u32::<BigEndian>(grib_signed_i32(self.la1_micro)).unwrap();
        s.write_u32::<BigEndian>(grib_signed_i32(self.lo1_micro)).unwrap();
        s.write_u8(48).unwrap(); // resolution and component flags
        s.write_u32::<BigEndian>(grib_signed_i32(la2)).unwrap();
        s.write_u32::<BigEndian>(grib_signed_i32(lo2)).unwrap();
        s.write_u32::<BigEndian>(self.d_micro).unwrap(); // Di
        s.write_u32::<BigEndian>(self.d_micro).unwrap(); // Dj
        s.write_u8(0b00000000).unwrap(); // +i, -j, i consecutive
        s
    }

    fn section4(&self) -> Vec<u8> {
        // Product definition template 4.0, forecast at a horizontal level.
        let mut s = Vec::new();
        s.write_u32::<BigEndian>(34).unwrap();
        s.write_u8(4).unwrap();
        s.write_u16::<BigEndian>(0).unwrap(); // no coordinate values
        s.write_u16::<BigEndian>(0).unwrap(); // template 4.0
        s.write_u8(self.param_category).unwrap();
        s.write_u8(self.param_number).unwrap();
        s.write_u8(2).unwrap(); // generating process = forecast
        s.write_u8(0).unwrap();
        s.write_u8(0).unwrap();
        s.write_u16::<BigEndian>(0).unwrap(); // hours of cutoff
        s.write_u8(0).unwrap(); // minutes of cutoff
        s.write_u8(1).unwrap(); // time unit = hour
        s.write_u32::<BigEndian>(self.forecast_hour).unwrap();
        s.write_u8(self.level_type).unwrap();
        s.write_u8(0).unwrap(); // scale factor
        s.write_u32::<BigEndian>(self.level_value).unwrap();
        s.write_u8(255).unwrap(); // no second surface
        s.write_u8(0).unwrap();
        s.write_u32::<BigEndian>(0).unwrap();
        s
    }

    fn section5(&self) -> Vec<u8> {
        let (reference, scale, nbit) = self.packing();

        let mut s = Vec::new();
        s.write_u32::<BigEndian>(21).unwrap();
        s.write_u8(5).unwrap();
        s.write_u32::<BigEndian>(self.ni * self.nj).unwrap();
        s.write_u16::<BigEndian>(0).unwrap(); // template 5.0
        s.write_f32::<BigEndian>(reference).unwrap();
        s.write_u16::<BigEndian>(grib_signed(scale)).unwrap(); // binary scale factor
        s.write_u16::<BigEndian>(grib_signed(0)).unwrap(); // decimal scale factor
        s.write_u8(nbit).unwrap();
        s.write_u8(0).unwrap(); // floating point originals
        s
    }

    fn section6(&self) -> Vec<u8> {
        let mut s = Vec::new();
        s.write_u32::<BigEndian>(6).unwrap();
        s.write_u8(6).unwrap();
        s.write_u8(255).unwrap(); // no bitmap
        s
    }

    fn section7(&self) -> Vec<u8> {
        let mut s = Vec::new();
        let packed = self.pack_values();
        s.write_u32::<BigEndian>(5 + packed.len() as u32).unwrap();
        s.write_u8(7).unwrap();
        s.extend_from_slice(&packed);
        s
    }

    /// (reference value, binary scale factor, bits per value).
    fn packing(&self) -> (f32, i16, u8) {
        match &self.data {
            FieldData::Constant(value) => (*value, 0, 0),
            FieldData::Values(values) => {
                let min = values.iter().copied().fold(f32::INFINITY, f32::min);
                let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let range = max - min;
                if range == 0.0 {
                    (min, 0, 0)
                } else {
                    let scale = (range / 65535.0).log2().ceil() as i16;
                    (min, scale, 16)
                }
            }
        }
    }

    fn pack_values(&self) -> Vec<u8> {
        let (reference, scale, nbit) = self.packing();
        if nbit == 0 {
            return Vec::new();
        }
        let values = match &self.data {
            FieldData::Values(values) => values,
            FieldData::Constant(_) => unreachable!(),
        };
        let factor = 2_f32.powi(i32::from(scale));
        let mut packed = Vec::with_capacity(values.len() * 2);
        for &value in values {
            let encoded = ((value - reference) / factor).round() as u16;
            packed.write_u16::<BigEndian>(encoded).unwrap();
        }
        packed
    }
}

/// Sign-magnitude encoding used for signed integers in GRIB sections; the
/// sign lives in the top bit rather than two's complement.
fn grib_signed(value: i16) -> u16 {
    if value < 0 {
        0x8000 | value.unsigned_abs()
    } else {
        value as u16
    }
}

fn grib_signed_i32(value: i32) -> u32 {
    if value < 0 {
        0x8000_0000 | value.unsigned_abs()
    } else {
        value as u32
    }
}

/// Writes concatenated messages as one GRIB2 file under `dir`.
pub fn write_grib(dir: &Path, name: &str, messages: &[Vec<u8>]) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = Vec::new();
    for message in messages {
        bytes.extend_from_slice(message);
    }
    std::fs::write(&path, bytes).unwrap();
    path
}

/// A 2-step temperature file on a 4x3 grid: hour 0 decodes to 1.5, hour 6
/// to 2.5, everywhere.
pub fn two_step_temperature(dir: &Path) -> PathBuf {
    write_grib(
        dir,
        "temperature.grib2",
        &[
            MessageBuilder::new()
                .forecast_hour(0)
                .constant_value(1.5)
                .build(),
            MessageBuilder::new()
                .forecast_hour(6)
                .constant_value(2.5)
                .build(),
        ],
    )
}
