//! SSR correction hub: decodes provider streams, combines them and
//! re-encodes the consensus for upload.
use clap::Parser;
use gnss_rnx::eph::Eph;
use log::{error, info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

mod combiner;
mod config;
mod latency;
mod pipeline;
mod ppp;
mod rtnet;
mod uploader;

use config::Config;
use pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(author, version, about = "SSR correction streaming hub")]
struct Cli {
    /// configuration file (JSON key-value surface)
    #[arg(long)]
    config: PathBuf,

    /// broadcast ephemeris bootstrap, RINEX v3 navigation file
    #[arg(long)]
    nav: Option<PathBuf>,

    /// input stream as "<mountpoint>=<path>", repeatable
    #[arg(long = "input")]
    inputs: Vec<String>,

    /// encoded upload stream sink
    #[arg(long)]
    rtcm_out: Option<PathBuf>,

    /// plain text correction dump
    #[arg(long)]
    corr_out: Option<PathBuf>,

    /// verbosity, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/*
 * Navigation block sizes per system character.
 */
fn nav_block_lines(system: char) -> usize {
    match system {
        'R' | 'S' => 4,
        _ => 8,
    }
}

/// Reads a RINEX v3 navigation file into ephemerides
fn read_nav_file(path: &Path) -> std::io::Result<Vec<Eph>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    // skip the header
    for line in lines.by_ref() {
        let line = line?;
        if line.contains("END OF HEADER") {
            break;
        }
    }

    let mut ephs = Vec::new();
    let mut block: Vec<String> = Vec::new();
    let mut wanted = 0usize;
    for line in lines {
        let line = line?;
        if block.is_empty() {
            let system = match line.chars().next() {
                Some(system) if system.is_ascii_alphabetic() => system,
                _ => continue,
            };
            wanted = nav_block_lines(system);
            block.push(line);
        } else {
            block.push(line);
        }
        if block.len() == wanted {
            let refs: Vec<&str> = block.iter().map(|s| s.as_str()).collect();
            match Eph::from_rinex(3.04, ' ', &refs) {
                Ok(eph) => ephs.push(eph),
                Err(err) => warn!("navigation block rejected: {}", err),
            }
            block.clear();
        }
    }
    Ok(ephs)
}

fn run(cli: Cli) -> Result<(), String> {
    let config = Config::read(&cli.config).map_err(|e| format!("configuration: {}", e))?;

    let ephs = match cli.nav {
        Some(ref path) => {
            let ephs = read_nav_file(path).map_err(|e| format!("navigation file: {}", e))?;
            info!("{} broadcast ephemerides loaded", ephs.len());
            ephs
        },
        None => Vec::new(),
    };

    let mut inputs: Vec<(String, Box<dyn Read + Send>)> = Vec::new();
    for entry in cli.inputs.iter() {
        let (mountpoint, path) = entry
            .split_once('=')
            .ok_or_else(|| format!("malformed input {:?}", entry))?;
        let file = File::open(path).map_err(|e| format!("input {}: {}", path, e))?;
        inputs.push((mountpoint.to_string(), Box::new(file)));
    }

    let rtcm_out: Box<dyn Write + Send> = match cli.rtcm_out {
        Some(ref path) => {
            Box::new(File::create(path).map_err(|e| format!("rtcm sink: {}", e))?)
        },
        None => Box::new(std::io::sink()),
    };
    let corr_out: Option<Box<dyn Write + Send>> = match cli.corr_out {
        Some(ref path) => Some(Box::new(
            File::create(path).map_err(|e| format!("correction dump: {}", e))?,
        )),
        None => None,
    };

    let pipeline =
        Pipeline::run(&config, inputs, ephs, rtcm_out, corr_out).map_err(|e| e.to_string())?;
    pipeline.wait();
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(message) = run(cli) {
        error!("{}", message);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gnss_rnx::eph::EphModel;
    use gnss_rnx::prn::Prn;
    use gnss_rs::prelude::Constellation;
    use std::io::Write;

    #[test]
    fn nav_file_round_trip() {
        // write a small navigation file and read it back
        let toc = gnss_rnx::epoch::from_civil(2022, 7, 13, 12, 0, 0.0);
        let model = gnss_rnx::eph::EphGps {
            clock_bias: 1.0e-4,
            iode: 44.0,
            e: 0.01,
            m0: 1.2,
            sqrt_a: 5153.7,
            toe_sec: gnss_rnx::epoch::gps_sec_of_week(toc),
            omega0: -2.0,
            i0: 0.96,
            omega: 0.6,
            toe_week: gnss_rnx::epoch::gps_week_sec(toc).0 as f64,
            ..Default::default()
        };
        let eph = Eph::new(
            Prn::new(Constellation::GPS, 5, 0),
            toc,
            EphModel::Gps(model),
        );

        let dir = std::env::temp_dir().join("ssr-hub-nav-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("nav.rnx");
        {
            let mut file = File::create(&path).unwrap();
            writeln!(file, "{:60}END OF HEADER", "").unwrap();
            write!(file, "{}", eph.to_rinex(3.04)).unwrap();
        }

        let ephs = read_nav_file(&path).unwrap();
        assert_eq!(ephs.len(), 1);
        assert_eq!(ephs[0].prn.to_string(), "G05");
        assert_eq!(ephs[0].iod(), 44);
        let _ = std::fs::remove_file(&path);
    }
}
