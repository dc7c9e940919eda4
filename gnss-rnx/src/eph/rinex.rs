//! RINEX v2/v3 navigation block codec
use super::{Eph, EphBds, EphGal, EphGlo, EphGps, EphModel, EphSbas, Error};
use crate::constants::Constants;
use crate::epoch;
use crate::prn::Prn;
use gnss::prelude::Constellation;
use hifitime::Duration;

const FIELD_LEN: usize = 19;
/// RINEX value for "not known"
const UNKNOWN: f64 = 0.9999e9;

/// Fractional engineering notation of the RINEX navigation fields:
/// mantissa in (-1, 1) with `prec` digits, two digit exponent.
pub fn fortran_format(value: f64, width: usize, prec: usize) -> String {
    let mut expo = if value == 0.0 {
        0
    } else {
        value.abs().log10() as i32
    };
    let mut mant = if value == 0.0 {
        0.0
    } else {
        value / 10f64.powi(expo)
    };
    if mant.abs() >= 1.0 {
        mant /= 10.0;
        expo += 1;
    }
    if expo >= 0 {
        format!("{:>w$.p$}e+{:02}", mant, expo, w = width - 4, p = prec)
    } else {
        format!("{:>w$.p$}e-{:02}", mant, -expo, w = width - 4, p = prec)
    }
}

fn blank_field() -> String {
    " ".repeat(FIELD_LEN)
}

/*
 * Reads one 19 char float field, tolerating fortran 'D' exponents.
 */
fn read_dbl(line: &str, pos: usize, len: usize) -> Result<f64, Error> {
    if line.len() < pos {
        return Err(Error::RinexParsing(format!("short line: {:?}", line)));
    }
    let end = (pos + len).min(line.len());
    let field: String = line[pos..end]
        .chars()
        .map(|c| match c {
            'D' | 'd' | 'E' => 'e',
            other => other,
        })
        .collect();
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::RinexParsing(format!("bad float field: {:?}", field)))
}

fn read_dbl_or(line: &str, pos: usize, len: usize, default: f64) -> f64 {
    read_dbl(line, pos, len).unwrap_or(default)
}

fn field_positions(version: f64) -> [usize; 4] {
    let pos0 = if version < 3.0 { 3 } else { 4 };
    [pos0, pos0 + 19, pos0 + 38, pos0 + 57]
}

/*
 * Epoch line prefix: "G05 2022 07 13 12 00 00" (v3) or
 * " 5 22  7 13 12  0  0.0" (v2, system implied by the file).
 */
fn rinex_date_str(toc: hifitime::Epoch, prn: &Prn, version: f64) -> String {
    let (y, m, d, hh, mm, ss) = epoch::civil(toc);
    if version < 3.0 {
        let num = format!("{:02}", prn.number());
        let num = if num.starts_with('0') {
            format!(" {}", &num[1..])
        } else {
            num
        };
        format!(
            "{} {:02} {:2} {:2} {:2} {:2}{:5.1}",
            num,
            y % 100,
            m,
            d,
            hh,
            mm,
            ss
        )
    } else {
        format!(
            "{} {:4} {:02} {:02} {:02} {:02} {:02}",
            prn, y, m, d, hh, mm, ss as i32
        )
    }
}

fn push_line(out: &mut String, version: f64, fields: &[String]) {
    if version < 3.0 {
        out.push_str("   ");
    } else {
        out.push_str("    ");
    }
    for field in fields.iter() {
        out.push_str(field);
    }
    out.push('\n');
}

fn ff(value: f64) -> String {
    fortran_format(value, FIELD_LEN, 12)
}

/*
 * Parses the epoch line: satellite, civil date, three trailing fields.
 */
fn parse_epoch_line(
    version: f64,
    system: char,
    line: &str,
) -> Result<(Prn, hifitime::Epoch, f64, f64, f64), Error> {
    let pos = field_positions(version);
    let head = &line[..pos[1].min(line.len())];
    let mut items = head.split_ascii_whitespace();
    let first = items
        .next()
        .ok_or_else(|| Error::RinexParsing("empty epoch line".to_string()))?;

    let (sys, number) = if first.chars().next().unwrap_or(' ').is_ascii_alphabetic() {
        let sys = first.chars().next().unwrap();
        let number = if first.len() > 1 {
            first[1..]
                .trim()
                .parse::<u8>()
                .map_err(|_| Error::RinexParsing(format!("bad prn: {:?}", first)))?
        } else {
            // "G 5" style: the number is the next token
            items
                .next()
                .and_then(|s| s.parse::<u8>().ok())
                .ok_or_else(|| Error::RinexParsing("bad prn number".to_string()))?
        };
        (sys, number)
    } else {
        let number = first
            .parse::<u8>()
            .map_err(|_| Error::RinexParsing(format!("bad prn: {:?}", first)))?;
        (system, number)
    };

    let constellation = match sys {
        'G' => Constellation::GPS,
        'R' => Constellation::Glonass,
        'E' => Constellation::Galileo,
        'C' => Constellation::BeiDou,
        'J' => Constellation::QZSS,
        'S' => Constellation::SBAS,
        other => {
            return Err(Error::RinexParsing(format!(
                "unsupported system: {:?}",
                other
            )))
        },
    };

    let mut date = [0.0f64; 6];
    for field in date.iter_mut() {
        *field = items
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| Error::RinexParsing("bad epoch date".to_string()))?;
    }
    let mut year = date[0] as i32;
    if year < 80 {
        year += 2000;
    } else if year < 100 {
        year += 1900;
    }
    let toc = epoch::from_civil(
        year,
        date[1] as u8,
        date[2] as u8,
        date[3] as u8,
        date[4] as u8,
        date[5],
    );

    let f1 = read_dbl(line, pos[1], FIELD_LEN)?;
    let f2 = read_dbl(line, pos[2], FIELD_LEN)?;
    let f3 = read_dbl(line, pos[3], FIELD_LEN)?;

    Ok((Prn::new(constellation, number, 0), toc, f1, f2, f3))
}

impl Eph {
    /// Formats the navigation block for the given RINEX version
    pub fn to_rinex(&self, version: f64) -> String {
        match &self.model {
            EphModel::Gps(gps) => self.gps_to_rinex(gps, version),
            EphModel::Glo(glo) => self.glo_to_rinex(glo, version),
            EphModel::Gal(gal) => self.gal_to_rinex(gal, version),
            EphModel::Sbas(sbas) => self.sbas_to_rinex(sbas, version),
            EphModel::Bds(bds) => self.bds_to_rinex(bds, version),
        }
    }

    /// Parses one navigation block. `system` disambiguates v2 files
    /// whose epoch lines carry the bare satellite number.
    pub fn from_rinex(version: f64, system: char, lines: &[&str]) -> Result<Eph, Error> {
        let first = lines
            .first()
            .ok_or_else(|| Error::RinexParsing("empty block".to_string()))?;
        let sys = first
            .chars()
            .next()
            .filter(|c| c.is_ascii_alphabetic())
            .unwrap_or(system);
        match sys {
            'G' | 'J' => Self::gps_from_rinex(version, sys, lines),
            'R' => Self::glo_from_rinex(version, lines),
            'E' => Self::gal_from_rinex(version, lines),
            'S' => Self::sbas_from_rinex(version, lines),
            'C' => Self::bds_from_rinex(version, lines),
            other => Err(Error::RinexParsing(format!(
                "unsupported system: {:?}",
                other
            ))),
        }
    }

    fn gps_to_rinex(&self, gps: &EphGps, version: f64) -> String {
        let mut out = rinex_date_str(self.toc, &self.prn, version);
        out.push_str(&ff(gps.clock_bias));
        out.push_str(&ff(gps.clock_drift));
        out.push_str(&ff(gps.clock_drift_rate));
        out.push('\n');
        push_line(
            &mut out,
            version,
            &[ff(gps.iode), ff(gps.crs), ff(gps.delta_n), ff(gps.m0)],
        );
        push_line(
            &mut out,
            version,
            &[ff(gps.cuc), ff(gps.e), ff(gps.cus), ff(gps.sqrt_a)],
        );
        push_line(
            &mut out,
            version,
            &[ff(gps.toe_sec), ff(gps.cic), ff(gps.omega0), ff(gps.cis)],
        );
        push_line(
            &mut out,
            version,
            &[ff(gps.i0), ff(gps.crc), ff(gps.omega), ff(gps.omega_dot)],
        );
        push_line(
            &mut out,
            version,
            &[
                ff(gps.idot),
                ff(gps.l2_codes),
                ff(gps.toe_week),
                ff(gps.l2p_flag),
            ],
        );
        push_line(
            &mut out,
            version,
            &[ff(gps.ura), ff(gps.health), ff(gps.tgd), ff(gps.iodc)],
        );
        let tot = if gps.tot == UNKNOWN && version < 3.0 {
            0.0
        } else {
            gps.tot
        };
        push_line(
            &mut out,
            version,
            &[ff(tot), ff(gps.fit_interval), blank_field(), blank_field()],
        );
        out
    }

    fn gps_from_rinex(version: f64, system: char, lines: &[&str]) -> Result<Eph, Error> {
        if lines.len() != 8 {
            return Err(Error::RinexParsing("expecting 8 lines".to_string()));
        }
        let pos = field_positions(version);
        let (prn, toc, clock_bias, clock_drift, clock_drift_rate) =
            parse_epoch_line(version, system, lines[0])?;
        let mut gps = EphGps {
            clock_bias,
            clock_drift,
            clock_drift_rate,
            ..Default::default()
        };
        gps.iode = read_dbl(lines[1], pos[0], FIELD_LEN)?;
        gps.crs = read_dbl(lines[1], pos[1], FIELD_LEN)?;
        gps.delta_n = read_dbl(lines[1], pos[2], FIELD_LEN)?;
        gps.m0 = read_dbl(lines[1], pos[3], FIELD_LEN)?;
        gps.cuc = read_dbl(lines[2], pos[0], FIELD_LEN)?;
        gps.e = read_dbl(lines[2], pos[1], FIELD_LEN)?;
        gps.cus = read_dbl(lines[2], pos[2], FIELD_LEN)?;
        gps.sqrt_a = read_dbl(lines[2], pos[3], FIELD_LEN)?;
        gps.toe_sec = read_dbl(lines[3], pos[0], FIELD_LEN)?;
        gps.cic = read_dbl(lines[3], pos[1], FIELD_LEN)?;
        gps.omega0 = read_dbl(lines[3], pos[2], FIELD_LEN)?;
        gps.cis = read_dbl(lines[3], pos[3], FIELD_LEN)?;
        gps.i0 = read_dbl(lines[4], pos[0], FIELD_LEN)?;
        gps.crc = read_dbl(lines[4], pos[1], FIELD_LEN)?;
        gps.omega = read_dbl(lines[4], pos[2], FIELD_LEN)?;
        gps.omega_dot = read_dbl(lines[4], pos[3], FIELD_LEN)?;
        gps.idot = read_dbl(lines[5], pos[0], FIELD_LEN)?;
        gps.l2_codes = read_dbl_or(lines[5], pos[1], FIELD_LEN, 0.0);
        gps.toe_week = read_dbl(lines[5], pos[2], FIELD_LEN)?;
        gps.l2p_flag = read_dbl_or(lines[5], pos[3], FIELD_LEN, 0.0);
        gps.ura = read_dbl(lines[6], pos[0], FIELD_LEN)?;
        gps.health = read_dbl(lines[6], pos[1], FIELD_LEN)?;
        gps.tgd = read_dbl(lines[6], pos[2], FIELD_LEN)?;
        gps.iodc = read_dbl_or(lines[6], pos[3], FIELD_LEN, 0.0);
        gps.tot = read_dbl_or(lines[7], pos[0], FIELD_LEN, 0.0);
        gps.fit_interval = read_dbl_or(lines[7], pos[1], FIELD_LEN, 0.0);

        Ok(Eph::new(prn, toc, EphModel::Gps(gps)))
    }

    fn glo_to_rinex(&self, glo: &EphGlo, version: f64) -> String {
        let toc_utc = self.toc - Duration::from_seconds(glo.gps_utc as f64);
        let mut out = rinex_date_str(toc_utc, &self.prn, version);
        out.push_str(&ff(-glo.tau));
        out.push_str(&ff(glo.gamma));
        out.push_str(&ff(glo.tki));
        out.push('\n');
        push_line(
            &mut out,
            version,
            &[
                ff(glo.x_pos),
                ff(glo.x_velocity),
                ff(glo.x_acceleration),
                ff(glo.health),
            ],
        );
        push_line(
            &mut out,
            version,
            &[
                ff(glo.y_pos),
                ff(glo.y_velocity),
                ff(glo.y_acceleration),
                ff(glo.frequency_number),
            ],
        );
        push_line(
            &mut out,
            version,
            &[
                ff(glo.z_pos),
                ff(glo.z_velocity),
                ff(glo.z_acceleration),
                ff(glo.age),
            ],
        );
        out
    }

    fn glo_from_rinex(version: f64, lines: &[&str]) -> Result<Eph, Error> {
        if lines.len() != 4 {
            return Err(Error::RinexParsing("expecting 4 lines".to_string()));
        }
        let pos = field_positions(version);
        let (prn, toc_utc, tau, gamma, tki) = parse_epoch_line(version, 'R', lines[0])?;
        let (y, m, d, _, _, _) = epoch::civil(toc_utc);
        let gps_utc = epoch::gps_leap_seconds(y, m, d);
        let toc = toc_utc + Duration::from_seconds(gps_utc as f64);
        let glo = EphGlo {
            gps_utc,
            tau: -tau,
            gamma,
            tki,
            x_pos: read_dbl(lines[1], pos[0], FIELD_LEN)?,
            x_velocity: read_dbl(lines[1], pos[1], FIELD_LEN)?,
            x_acceleration: read_dbl(lines[1], pos[2], FIELD_LEN)?,
            health: read_dbl(lines[1], pos[3], FIELD_LEN)?,
            y_pos: read_dbl(lines[2], pos[0], FIELD_LEN)?,
            y_velocity: read_dbl(lines[2], pos[1], FIELD_LEN)?,
            y_acceleration: read_dbl(lines[2], pos[2], FIELD_LEN)?,
            frequency_number: read_dbl(lines[2], pos[3], FIELD_LEN)?,
            z_pos: read_dbl(lines[3], pos[0], FIELD_LEN)?,
            z_velocity: read_dbl(lines[3], pos[1], FIELD_LEN)?,
            z_acceleration: read_dbl(lines[3], pos[2], FIELD_LEN)?,
            age: read_dbl_or(lines[3], pos[3], FIELD_LEN, 0.0),
        };
        Ok(Eph::new(prn, toc, EphModel::Glo(glo)))
    }

    fn gal_to_rinex(&self, gal: &EphGal, version: f64) -> String {
        let mut out = rinex_date_str(self.toc, &self.prn, version);
        out.push_str(&ff(gal.clock_bias));
        out.push_str(&ff(gal.clock_drift));
        out.push_str(&ff(gal.clock_drift_rate));
        out.push('\n');
        push_line(
            &mut out,
            version,
            &[ff(gal.iod_nav), ff(gal.crs), ff(gal.delta_n), ff(gal.m0)],
        );
        push_line(
            &mut out,
            version,
            &[ff(gal.cuc), ff(gal.e), ff(gal.cus), ff(gal.sqrt_a)],
        );
        push_line(
            &mut out,
            version,
            &[ff(gal.toe_sec), ff(gal.cic), ff(gal.omega0), ff(gal.cis)],
        );
        push_line(
            &mut out,
            version,
            &[ff(gal.i0), ff(gal.crc), ff(gal.omega), ff(gal.omega_dot)],
        );

        let mut data_source: i32 = 0;
        let mut sv_health: i32 = 0;
        let mut bgd_1_5b = gal.bgd_1_5b;
        if gal.fnav {
            data_source |= 1 << 1;
            data_source |= 1 << 8;
            bgd_1_5b = 0.0;
            if gal.e5a_data_invalid {
                sv_health |= 1 << 3;
            }
            sv_health |= ((gal.e5a_hs as i32) & 0x3) << 4;
        } else if gal.inav {
            // both bit 0 and 2 can be set if the navigation messages
            // were merged (RINEX 3.03)
            data_source |= 1 << 0;
            data_source |= 1 << 2;
            data_source |= 1 << 9;
            if gal.e1_data_invalid {
                sv_health |= 1 << 0;
            }
            sv_health |= ((gal.e1b_hs as i32) & 0x3) << 1;
            if gal.e5a_data_invalid {
                sv_health |= 1 << 3;
            }
            sv_health |= ((gal.e5a_hs as i32) & 0x3) << 4;
            if gal.e5b_data_invalid {
                sv_health |= 1 << 6;
            }
            sv_health |= ((gal.e5b_hs as i32) & 0x3) << 7;
        }

        push_line(
            &mut out,
            version,
            &[
                ff(gal.idot),
                ff(data_source as f64),
                ff(gal.toe_week + 1024.0),
                ff(0.0),
            ],
        );
        push_line(
            &mut out,
            version,
            &[
                ff(gal.sisa),
                ff(sv_health as f64),
                ff(gal.bgd_1_5a),
                ff(bgd_1_5b),
            ],
        );
        let tot = if gal.tot == UNKNOWN && version < 3.0 {
            0.0
        } else {
            gal.tot
        };
        push_line(
            &mut out,
            version,
            &[ff(tot), blank_field(), blank_field(), blank_field()],
        );
        out
    }

    fn gal_from_rinex(version: f64, lines: &[&str]) -> Result<Eph, Error> {
        if lines.len() != 8 {
            return Err(Error::RinexParsing("expecting 8 lines".to_string()));
        }
        let pos = field_positions(version);
        let (mut prn, toc, clock_bias, clock_drift, clock_drift_rate) =
            parse_epoch_line(version, 'E', lines[0])?;
        let mut gal = EphGal {
            clock_bias,
            clock_drift,
            clock_drift_rate,
            ..Default::default()
        };
        gal.iod_nav = read_dbl(lines[1], pos[0], FIELD_LEN)?;
        gal.crs = read_dbl(lines[1], pos[1], FIELD_LEN)?;
        gal.delta_n = read_dbl(lines[1], pos[2], FIELD_LEN)?;
        gal.m0 = read_dbl(lines[1], pos[3], FIELD_LEN)?;
        gal.cuc = read_dbl(lines[2], pos[0], FIELD_LEN)?;
        gal.e = read_dbl(lines[2], pos[1], FIELD_LEN)?;
        gal.cus = read_dbl(lines[2], pos[2], FIELD_LEN)?;
        gal.sqrt_a = read_dbl(lines[2], pos[3], FIELD_LEN)?;
        gal.toe_sec = read_dbl(lines[3], pos[0], FIELD_LEN)?;
        gal.cic = read_dbl(lines[3], pos[1], FIELD_LEN)?;
        gal.omega0 = read_dbl(lines[3], pos[2], FIELD_LEN)?;
        gal.cis = read_dbl(lines[3], pos[3], FIELD_LEN)?;
        gal.i0 = read_dbl(lines[4], pos[0], FIELD_LEN)?;
        gal.crc = read_dbl(lines[4], pos[1], FIELD_LEN)?;
        gal.omega = read_dbl(lines[4], pos[2], FIELD_LEN)?;
        gal.omega_dot = read_dbl(lines[4], pos[3], FIELD_LEN)?;
        gal.idot = read_dbl(lines[5], pos[0], FIELD_LEN)?;
        let data_source = read_dbl(lines[5], pos[1], FIELD_LEN)? as i32;
        gal.toe_week = read_dbl(lines[5], pos[2], FIELD_LEN)? - 1024.0;
        if data_source & (1 << 8) != 0 {
            gal.fnav = true;
        } else if data_source & (1 << 9) != 0 {
            gal.inav = true;
        }
        gal.sisa = read_dbl(lines[6], pos[0], FIELD_LEN)?;
        let sv_health = read_dbl(lines[6], pos[1], FIELD_LEN)? as i32;
        gal.bgd_1_5a = read_dbl(lines[6], pos[2], FIELD_LEN)?;
        gal.bgd_1_5b = read_dbl_or(lines[6], pos[3], FIELD_LEN, 0.0);
        gal.e1_data_invalid = sv_health & (1 << 0) != 0;
        gal.e1b_hs = ((sv_health >> 1) & 0x3) as f64;
        gal.e5a_data_invalid = sv_health & (1 << 3) != 0;
        gal.e5a_hs = ((sv_health >> 4) & 0x3) as f64;
        gal.e5b_data_invalid = sv_health & (1 << 6) != 0;
        gal.e5b_hs = ((sv_health >> 7) & 0x3) as f64;
        gal.tot = read_dbl_or(lines[7], pos[0], FIELD_LEN, 0.0);

        prn.flag = if gal.inav { 1 } else { 0 };
        Ok(Eph::new(prn, toc, EphModel::Gal(gal)))
    }

    fn sbas_to_rinex(&self, sbas: &EphSbas, version: f64) -> String {
        let mut out = rinex_date_str(self.toc, &self.prn, version);
        out.push_str(&ff(sbas.agf0));
        out.push_str(&ff(sbas.agf1));
        out.push_str(&ff(sbas.tow));
        out.push('\n');
        push_line(
            &mut out,
            version,
            &[
                ff(1.0e-3 * sbas.x_pos),
                ff(1.0e-3 * sbas.x_velocity),
                ff(1.0e-3 * sbas.x_acceleration),
                ff(sbas.health),
            ],
        );
        push_line(
            &mut out,
            version,
            &[
                ff(1.0e-3 * sbas.y_pos),
                ff(1.0e-3 * sbas.y_velocity),
                ff(1.0e-3 * sbas.y_acceleration),
                ff(sbas.ura),
            ],
        );
        push_line(
            &mut out,
            version,
            &[
                ff(1.0e-3 * sbas.z_pos),
                ff(1.0e-3 * sbas.z_velocity),
                ff(1.0e-3 * sbas.z_acceleration),
                ff(sbas.iodn as f64),
            ],
        );
        out
    }

    fn sbas_from_rinex(version: f64, lines: &[&str]) -> Result<Eph, Error> {
        if lines.len() != 4 {
            return Err(Error::RinexParsing("expecting 4 lines".to_string()));
        }
        let pos = field_positions(version);
        let (prn, toc, agf0, agf1, tow) = parse_epoch_line(version, 'S', lines[0])?;
        let sbas = EphSbas {
            agf0,
            agf1,
            tow,
            x_pos: read_dbl(lines[1], pos[0], FIELD_LEN)? * 1.0e3,
            x_velocity: read_dbl(lines[1], pos[1], FIELD_LEN)? * 1.0e3,
            x_acceleration: read_dbl(lines[1], pos[2], FIELD_LEN)? * 1.0e3,
            health: read_dbl(lines[1], pos[3], FIELD_LEN)?,
            y_pos: read_dbl(lines[2], pos[0], FIELD_LEN)? * 1.0e3,
            y_velocity: read_dbl(lines[2], pos[1], FIELD_LEN)? * 1.0e3,
            y_acceleration: read_dbl(lines[2], pos[2], FIELD_LEN)? * 1.0e3,
            ura: read_dbl(lines[2], pos[3], FIELD_LEN)?,
            z_pos: read_dbl(lines[3], pos[0], FIELD_LEN)? * 1.0e3,
            z_velocity: read_dbl(lines[3], pos[1], FIELD_LEN)? * 1.0e3,
            z_acceleration: read_dbl(lines[3], pos[2], FIELD_LEN)? * 1.0e3,
            iodn: read_dbl_or(lines[3], pos[3], FIELD_LEN, 0.0) as i32,
        };
        Ok(Eph::new(prn, toc, EphModel::Sbas(sbas)))
    }

    fn bds_to_rinex(&self, bds: &EphBds, version: f64) -> String {
        let toc_bdt = self.toc - Duration::from_seconds(Constants::BDS_LEAP);
        let mut out = rinex_date_str(toc_bdt, &self.prn, version);
        out.push_str(&ff(bds.clock_bias));
        out.push_str(&ff(bds.clock_drift));
        out.push_str(&ff(bds.clock_drift_rate));
        out.push('\n');
        push_line(
            &mut out,
            version,
            &[ff(bds.aode as f64), ff(bds.crs), ff(bds.delta_n), ff(bds.m0)],
        );
        push_line(
            &mut out,
            version,
            &[ff(bds.cuc), ff(bds.e), ff(bds.cus), ff(bds.sqrt_a)],
        );
        // week and second of ephemeris come from the navigation fields
        // when read from RINEX, from the TOE instant when built from a
        // real time stream
        let (toes, toew, tots) = if bds.toe_week > -1.0 {
            (bds.toe_sec, bds.toe_week, bds.tot)
        } else {
            match bds.toe {
                Some(toe) => {
                    let (week, sec) = epoch::bds_week_sec(toe);
                    (sec, week as f64, sec)
                },
                None => (0.0, 0.0, 0.0),
            }
        };
        push_line(
            &mut out,
            version,
            &[ff(toes), ff(bds.cic), ff(bds.omega0), ff(bds.cis)],
        );
        push_line(
            &mut out,
            version,
            &[ff(bds.i0), ff(bds.crc), ff(bds.omega), ff(bds.omega_dot)],
        );
        push_line(
            &mut out,
            version,
            &[ff(bds.idot), ff(0.0), ff(toew), ff(0.0)],
        );
        push_line(
            &mut out,
            version,
            &[
                ff(bds.ura),
                ff(bds.sat_h1 as f64),
                ff(bds.tgd1),
                ff(bds.tgd2),
            ],
        );
        push_line(
            &mut out,
            version,
            &[ff(tots), ff(bds.aodc as f64), blank_field(), blank_field()],
        );
        out
    }

    fn bds_from_rinex(version: f64, lines: &[&str]) -> Result<Eph, Error> {
        if lines.len() != 8 {
            return Err(Error::RinexParsing("expecting 8 lines".to_string()));
        }
        let pos = field_positions(version);
        let (prn, toc_bdt, clock_bias, clock_drift, clock_drift_rate) =
            parse_epoch_line(version, 'C', lines[0])?;
        // the epoch line is on the BDS timescale
        let toc = toc_bdt + Duration::from_seconds(Constants::BDS_LEAP);
        let mut bds = EphBds {
            clock_bias,
            clock_drift,
            clock_drift_rate,
            ..Default::default()
        };
        bds.aode = read_dbl(lines[1], pos[0], FIELD_LEN)? as i32;
        bds.crs = read_dbl(lines[1], pos[1], FIELD_LEN)?;
        bds.delta_n = read_dbl(lines[1], pos[2], FIELD_LEN)?;
        bds.m0 = read_dbl(lines[1], pos[3], FIELD_LEN)?;
        bds.cuc = read_dbl(lines[2], pos[0], FIELD_LEN)?;
        bds.e = read_dbl(lines[2], pos[1], FIELD_LEN)?;
        bds.cus = read_dbl(lines[2], pos[2], FIELD_LEN)?;
        bds.sqrt_a = read_dbl(lines[2], pos[3], FIELD_LEN)?;
        bds.toe_sec = read_dbl(lines[3], pos[0], FIELD_LEN)?;
        bds.cic = read_dbl(lines[3], pos[1], FIELD_LEN)?;
        bds.omega0 = read_dbl(lines[3], pos[2], FIELD_LEN)?;
        bds.cis = read_dbl(lines[3], pos[3], FIELD_LEN)?;
        bds.i0 = read_dbl(lines[4], pos[0], FIELD_LEN)?;
        bds.crc = read_dbl(lines[4], pos[1], FIELD_LEN)?;
        bds.omega = read_dbl(lines[4], pos[2], FIELD_LEN)?;
        bds.omega_dot = read_dbl(lines[4], pos[3], FIELD_LEN)?;
        bds.idot = read_dbl(lines[5], pos[0], FIELD_LEN)?;
        bds.toe_week = read_dbl(lines[5], pos[2], FIELD_LEN)?;
        bds.ura = read_dbl(lines[6], pos[0], FIELD_LEN)?;
        bds.sat_h1 = read_dbl(lines[6], pos[1], FIELD_LEN)? as i32;
        bds.tgd1 = read_dbl(lines[6], pos[2], FIELD_LEN)?;
        bds.tgd2 = read_dbl(lines[6], pos[3], FIELD_LEN)?;
        bds.tot = read_dbl_or(lines[7], pos[0], FIELD_LEN, 0.0);
        if bds.tot == UNKNOWN {
            bds.tot = bds.toe_sec;
        }
        bds.aodc = read_dbl_or(lines[7], pos[1], FIELD_LEN, 0.0) as i32;
        bds.toe = Some(epoch::from_bds_week_sec(bds.toe_week as u32, bds.toe_sec));
        Ok(Eph::new(prn, toc, EphModel::Bds(bds)))
    }
}

#[cfg(test)]
mod test {
    use super::super::test::gps_eph;
    use super::*;

    #[test]
    fn format_values() {
        assert_eq!(fortran_format(0.0, 19, 12), " 0.000000000000e+00");
        assert_eq!(fortran_format(5153.7, 19, 12), " 0.515370000000e+04");
        assert_eq!(fortran_format(-1.0e-4, 19, 12), "-0.100000000000e-03");
        for value in [0.0, 1.0, -0.5, 123456.789, -9.87e-12] {
            let formatted = fortran_format(value, 19, 12);
            assert_eq!(formatted.len(), 19, "{:?}", formatted);
            let parsed: f64 = formatted.trim().parse().unwrap();
            assert!((parsed - value).abs() <= value.abs() * 1.0e-12 + 1.0e-15);
        }
    }

    #[test]
    fn gps_v3_fixed_point() {
        let eph = gps_eph();
        let first = eph.to_rinex(3.04);
        let lines: Vec<&str> = first.lines().collect();
        assert_eq!(lines.len(), 8);
        let parsed = Eph::from_rinex(3.04, ' ', &lines).unwrap();
        assert_eq!(parsed.prn, eph.prn);
        assert_eq!(parsed.toc, eph.toc);
        let second = parsed.to_rinex(3.04);
        assert_eq!(first, second);
    }

    #[test]
    fn gps_v2_fixed_point() {
        let eph = gps_eph();
        let first = eph.to_rinex(2.11);
        let lines: Vec<&str> = first.lines().collect();
        let parsed = Eph::from_rinex(2.11, 'G', &lines).unwrap();
        assert_eq!(parsed.prn, eph.prn);
        let second = parsed.to_rinex(2.11);
        assert_eq!(first, second);
    }

    #[test]
    fn glonass_fixed_point() {
        use super::super::{EphGlo, EphModel};
        use crate::prn::Prn;
        use gnss::prelude::Constellation;
        let toc = crate::epoch::from_civil(2022, 7, 13, 11, 45, 0.0);
        let glo = EphGlo {
            gps_utc: 18,
            tau: -1.86264514923e-9,
            gamma: 0.0,
            tki: 84600.0,
            x_pos: 11987.97753906,
            x_velocity: -0.61695003510,
            x_acceleration: 0.0,
            health: 0.0,
            y_pos: 15152.71679688,
            y_velocity: 1.21127605438,
            y_acceleration: 9.31322574615e-10,
            frequency_number: -4.0,
            z_pos: 16600.90478516,
            z_velocity: -1.66191673279,
            z_acceleration: -1.86264514923e-9,
            age: 0.0,
        };
        let eph = Eph::new(
            Prn::new(Constellation::Glonass, 4, 0),
            toc + Duration::from_seconds(18.0),
            EphModel::Glo(glo),
        );
        let first = eph.to_rinex(3.04);
        let lines: Vec<&str> = first.lines().collect();
        assert_eq!(lines.len(), 4);
        let parsed = Eph::from_rinex(3.04, ' ', &lines).unwrap();
        assert_eq!(first, parsed.to_rinex(3.04));
        // leap seconds restored on read
        assert_eq!(parsed.toc, eph.toc);
    }

    #[test]
    fn galileo_inav_flag() {
        use super::super::{EphGal, EphModel};
        use crate::prn::Prn;
        use gnss::prelude::Constellation;
        let toc = crate::epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let gal = EphGal {
            clock_bias: 1.0e-4,
            iod_nav: 87.0,
            sqrt_a: 5440.6,
            e: 0.0002,
            m0: 1.0,
            i0: 0.97,
            toe_sec: 302400.0,
            toe_week: 1196.0,
            sisa: 3.12,
            bgd_1_5a: 1.0e-9,
            bgd_1_5b: 2.0e-9,
            inav: true,
            e5b_hs: 1.0,
            ..Default::default()
        };
        let eph = Eph::new(
            Prn::new(Constellation::Galileo, 3, 1),
            toc,
            EphModel::Gal(gal),
        );
        let first = eph.to_rinex(3.04);
        let lines: Vec<&str> = first.lines().collect();
        let parsed = Eph::from_rinex(3.04, ' ', &lines).unwrap();
        assert_eq!(parsed.prn.flag, 1);
        match &parsed.model {
            EphModel::Gal(parsed_gal) => {
                assert!(parsed_gal.inav && !parsed_gal.fnav);
                assert_eq!(parsed_gal.e5b_hs, 1.0);
                assert_eq!(parsed_gal.toe_week, 1196.0);
            },
            _ => panic!("wrong variant"),
        }
        assert_eq!(first, parsed.to_rinex(3.04));
    }

    #[test]
    fn bds_fixed_point() {
        use super::super::{EphBds, EphModel};
        use crate::prn::Prn;
        use gnss::prelude::Constellation;
        let toc = crate::epoch::from_bds_civil(2022, 7, 13, 12, 0, 0.0);
        let bds = EphBds {
            clock_bias: 1.0e-4,
            aode: 5,
            sqrt_a: 5282.6,
            e: 0.0005,
            m0: -0.5,
            i0: 0.95,
            toe_sec: 302400.0,
            toe_week: 866.0,
            toe: Some(crate::epoch::from_bds_week_sec(866, 302400.0)),
            sat_h1: 0,
            tgd1: 1.0e-9,
            tgd2: -2.0e-9,
            aodc: 6,
            ..Default::default()
        };
        let eph = Eph::new(
            Prn::new(Constellation::BeiDou, 6, 0),
            toc,
            EphModel::Bds(bds),
        );
        let first = eph.to_rinex(3.04);
        let lines: Vec<&str> = first.lines().collect();
        let parsed = Eph::from_rinex(3.04, ' ', &lines).unwrap();
        assert_eq!(parsed.toc, eph.toc);
        assert_eq!(first, parsed.to_rinex(3.04));
    }

    #[test]
    fn sbas_scaling() {
        use super::super::{EphModel, EphSbas};
        use crate::prn::Prn;
        use gnss::prelude::Constellation;
        let toc = crate::epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let sbas = EphSbas {
            agf0: 1.0e-7,
            x_pos: 26000.0e3,
            y_pos: 30000.0e3,
            z_pos: -100.0e3,
            x_velocity: 1.25,
            iodn: 17,
            ..Default::default()
        };
        let eph = Eph::new(
            Prn::new(Constellation::SBAS, 23, 0),
            toc,
            EphModel::Sbas(sbas),
        );
        let first = eph.to_rinex(3.04);
        let lines: Vec<&str> = first.lines().collect();
        let parsed = Eph::from_rinex(3.04, ' ', &lines).unwrap();
        match &parsed.model {
            EphModel::Sbas(parsed_sbas) => {
                // km on the line, meters in memory
                assert!((parsed_sbas.x_pos - 26000.0e3).abs() < 1.0);
                assert_eq!(parsed_sbas.iodn, 17);
            },
            _ => panic!("wrong variant"),
        }
        assert_eq!(first, parsed.to_rinex(3.04));
    }
}
