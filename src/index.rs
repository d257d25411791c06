use std::f64::consts::PI;

pub const MAX_ZOOM: u8 = 32;
pub const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

pub fn encode(x: u32, y: u32) -> u64 {
    spread(x) << 1 | spread(y)
}

pub fn decode(key: u64) -> (u32, u32) {
    (squash(key >> 1), squash(key))
}

fn spread(v: u32) -> u64 {
    let mut v = v as u64;
    v = (v | (v << 16)) & 0x0000_FFFF_0000_FFFF;
    v = (v | (v << 8)) & 0x00FF_00FF_00FF_00FF;
    v = (v | (v << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    v = (v | (v << 2)) & 0x3333_3333_3333_3333;
    v = (v | (v << 1)) & 0x5555_5555_5555_5555;
    v
}

fn squash(v: u64) -> u32 {
    let mut v = v & 0x5555_5555_5555_5555;
    v = (v | (v >> 1)) & 0x3333_3333_3333_3333;
    v = (v | (v >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    v = (v | (v >> 4)) & 0x00FF_00FF_00FF_00FF;
    v = (v | (v >> 8)) & 0x0000_FFFF_0000_FFFF;
    v = (v | (v >> 16)) & 0x0000_0000_FFFF_FFFF;
    v as u32
}

pub fn project(lon: f64, lat: f64, bits: u8) -> (u32, u32) {
    let n = (1u64 << bits) as f64;
    let lat_rad = lat.to_radians();
    let x = n * ((lon + 180.0) / 360.0);
    let y = n * (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;
    (clamp_grid(x, bits), clamp_grid(y, bits))
}

fn clamp_grid(v: f64, bits: u8) -> u32 {
    let max = ((1u64 << bits) - 1) as f64;
    v.floor().clamp(0.0, max) as u32
}

pub fn unproject(x: u32, y: u32, bits: u8) -> (f64, f64) {
    let n = (1u64 << bits) as f64;
    let lon = 360.0 * (x as f64) / n - 180.0;
    let lat = (PI * (1.0 - 2.0 * (y as f64) / n)).sinh().atan().to_degrees();
    (lon, lat)
}

pub fn key_for(lon: f64, lat: f64, bits: u8) -> u64 {
    let (x, y) = project(lon, lat, bits);
    let shift = (MAX_ZOOM - bits) as u32;
    encode(shl32(x, shift), shl32(y, shift))
}

pub fn zoom_mask(zoom: u8) -> u64 {
    if zoom == 0 {
        0
    } else {
        u64::MAX << (64 - 2 * zoom as u32)
    }
}

pub fn tile_of(key: u64, zoom: u8) -> (u32, u32) {
    let (x, y) = decode(key);
    let shift = (MAX_ZOOM - zoom) as u32;
    (shr32(x, shift), shr32(y, shift))
}

pub fn tile_key_range(zoom: u8, x: u32, y: u32) -> (u64, u64) {
    let shift = (MAX_ZOOM - zoom) as u32;
    let lo = encode(shl32(x, shift), shl32(y, shift));
    (lo, lo | !zoom_mask(zoom))
}

pub(crate) fn shr32(v: u32, shift: u32) -> u32 {
    v.checked_shr(shift).unwrap_or(0)
}

pub(crate) fn shl32(v: u32, shift: u32) -> u32 {
    v.checked_shl(shift).unwrap_or(0)
}
