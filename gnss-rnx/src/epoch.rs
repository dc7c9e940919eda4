//! GPS / BDS week addressing and leap second helpers on top of [Epoch]
use crate::constants::Constants;
use hifitime::{Duration, Epoch, TimeScale};

/// Days between the MJD origin and the GPS week origin (1980-01-06)
const MJD_GPS_ZERO: f64 = 44244.0;

/// Builds an [Epoch] from GPS week and second of week
pub fn from_gps_week_sec(week: u32, sec: f64) -> Epoch {
    let dur = Duration::from_days((week * 7) as f64) + Duration::from_seconds(sec);
    Epoch::from_duration(dur, TimeScale::GPST)
}

/// GPS week and second of week in [0, 604800)
pub fn gps_week_sec(t: Epoch) -> (u32, f64) {
    let total = t.to_duration_in_time_scale(TimeScale::GPST).to_seconds();
    let week = (total / Constants::SEC_PER_WEEK).floor();
    (week as u32, total - week * Constants::SEC_PER_WEEK)
}

/// Second of GPS week in [0, 604800)
pub fn gps_sec_of_week(t: Epoch) -> f64 {
    gps_week_sec(t).1
}

/// Builds an [Epoch] from BDS week and second of week.
/// BDS week = GPS week − 1356, BDS second = GPS second − 14.
pub fn from_bds_week_sec(week: u32, sec: f64) -> Epoch {
    let dur = Duration::from_days((week * 7) as f64) + Duration::from_seconds(sec);
    Epoch::from_duration(dur, TimeScale::BDT)
}

/// BDS week and second of week
pub fn bds_week_sec(t: Epoch) -> (u32, f64) {
    let total = t.to_duration_in_time_scale(TimeScale::BDT).to_seconds();
    let week = (total / Constants::SEC_PER_WEEK).floor();
    (week as u32, total - week * Constants::SEC_PER_WEEK)
}

/// Builds an [Epoch] from a civil date on the GPS timescale,
/// with fractional seconds preserved to the millisecond.
pub fn from_civil(year: i32, month: u8, day: u8, hour: u8, min: u8, sec: f64) -> Epoch {
    let whole = sec.floor();
    let nanos = ((sec - whole) * 1.0e9).round() as u32;
    Epoch::from_gregorian(
        year,
        month,
        day,
        hour,
        min,
        whole as u8,
        nanos,
        TimeScale::GPST,
    )
}

/// Builds an [Epoch] from a civil date read on the BDS timescale
/// (the instant maps to GPS time via the constant 14 s offset).
pub fn from_bds_civil(year: i32, month: u8, day: u8, hour: u8, min: u8, sec: f64) -> Epoch {
    let whole = sec.floor();
    let nanos = ((sec - whole) * 1.0e9).round() as u32;
    Epoch::from_gregorian(
        year,
        month,
        day,
        hour,
        min,
        whole as u8,
        nanos,
        TimeScale::BDT,
    )
}

/// Civil date and time of day on the GPS timescale,
/// seconds returned with fractional part.
pub fn civil(t: Epoch) -> (i32, u8, u8, u8, u8, f64) {
    let (y, m, d, hh, mm, ss, nanos) = t.to_gregorian(TimeScale::GPST);
    (y, m, d, hh, mm, ss as f64 + nanos as f64 * 1.0e-9)
}

/// Modified Julian Day number (integer part)
pub fn mjd(t: Epoch) -> u32 {
    mjd_dec(t).floor() as u32
}

/// Second of day on the GPS timescale
pub fn day_sec(t: Epoch) -> f64 {
    let sow = gps_sec_of_week(t);
    sow - 86400.0 * (sow / 86400.0).floor()
}

/// MJD including the fractional day
pub fn mjd_dec(t: Epoch) -> f64 {
    MJD_GPS_ZERO + t.to_duration_in_time_scale(TimeScale::GPST).to_seconds() / 86400.0
}

/// Day of year, 1..=366
pub fn day_of_year(t: Epoch) -> u16 {
    let (y, m, d, _, _, _) = civil(t);
    let mut doy = d as u16;
    for month in 1..m {
        doy += days_in_month(y, month) as u16;
    }
    doy
}

fn days_in_month(year: i32, month: u8) -> u8 {
    const MONTHS: [u8; 13] = [0, 31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    if month == 2 && is_leap_year(year) {
        29
    } else {
        MONTHS[month as usize]
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0) && (year % 400 == 0 || year % 100 != 0)
}

/*
 * Leap second introduction dates. Each entry is the civil day on which
 * 23:59:59 UTC existed twice, with the TAI-UTC count reached afterwards.
 * 19 leap seconds existed at the GPS origin (1980-01-06).
 */
const GPS_LEAP_START: i32 = 19;
const LEAP_TABLE: [(u8, u8, i32, i32); 18] = [
    (30, 6, 1981, 20),
    (30, 6, 1982, 21),
    (30, 6, 1983, 22),
    (30, 6, 1985, 23),
    (31, 12, 1987, 24),
    (31, 12, 1989, 25),
    (31, 12, 1990, 26),
    (30, 6, 1992, 27),
    (30, 6, 1993, 28),
    (30, 6, 1994, 29),
    (31, 12, 1995, 30),
    (30, 6, 1997, 31),
    (31, 12, 1998, 32),
    (31, 12, 2005, 33),
    (31, 12, 2008, 34),
    (30, 6, 2012, 35),
    (30, 6, 2015, 36),
    (1, 1, 2017, 37),
];

/// Number of leap seconds between GPS and UTC/GLONASS time at the given
/// civil date.
pub fn gps_leap_seconds(year: i32, month: u8, day: u8) -> i32 {
    let mut ls = 0;
    for (l_day, l_month, l_year, taicount) in LEAP_TABLE.iter() {
        if year < *l_year {
            break;
        }
        if year > *l_year
            || month > *l_month
            || (month == *l_month && day > *l_day)
        {
            ls = taicount - GPS_LEAP_START;
        }
    }
    ls
}

/*
 * In the original decoding chain GLONASS epochs arrive as milliseconds of
 * the Moscow day while the receiver clock runs on GPS time. The day the
 * Moscow epoch belongs to is resolved by reconstructing the Moscow civil
 * date from the receiver week, then shifting by up to one day whenever the
 * two clocks sit on opposite sides of midnight within a 4 hour window.
 */
fn long_year(year: i32, month: u8) -> u32 {
    if is_leap_year(year) && (month == 0 || month == 2) {
        1
    } else {
        0
    }
}

/// Converts a Moscow day epoch to UTC (`fix_leap`) or GPS time.
/// `week`/`sec_of_week` carry the receiver GPS time on input and the
/// adjusted epoch on output; `msec_of_week` is the raw GLONASS epoch field.
pub fn glonass_to_gps(week: &mut i32, sec_of_week: &mut i32, msec_of_week: i32, fix_leap: bool) {
    const MONTHS: [u32; 13] = [0, 31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

    let mut j: i64 = (*week as i64) * 7 * 86400 + (*sec_of_week as i64) + 5 * 86400 + 3 * 3600;

    let mut year: i32 = 1980;
    loop {
        let days = 365 + long_year(year, 0);
        let k = (days as i64) * 86400 + gps_leap_seconds(year + 1, 1, 1) as i64;
        if j < k {
            break;
        }
        j -= k;
        year += 1;
    }
    let mut month: u8 = 1;
    loop {
        let days = MONTHS[month as usize] + long_year(year, month);
        let k = (days as i64) * 86400 + gps_leap_seconds(year, month + 1, 1) as i64;
        if j < k {
            break;
        }
        j -= k;
        month += 1;
    }
    let mut day: u8 = 1;
    while j >= 86400 + gps_leap_seconds(year, month, day + 1) as i64 {
        j -= 86400;
        day += 1;
    }

    let nul = gps_leap_seconds(year, month, day);
    let glo_timeofday = j - nul as i64;

    // 4 hour day crossing window
    if msec_of_week < 4 * 3600 * 1000 && glo_timeofday > 20 * 3600 {
        *sec_of_week += 86400;
    } else if glo_timeofday < 4 * 3600 && msec_of_week > 20 * 3600 * 1000 {
        *sec_of_week -= 86400;
    }

    *sec_of_week += msec_of_week / 1000 - glo_timeofday as i32;
    if fix_leap {
        *sec_of_week -= nul;
    }
    if *sec_of_week < 0 {
        *sec_of_week += 7 * 86400;
        *week -= 1;
    }
    if *sec_of_week >= 7 * 86400 {
        *sec_of_week -= 7 * 86400;
        *week += 1;
    }
}
