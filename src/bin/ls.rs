//! This program lists the contents of a PROIO container as plain text.
//!
//! Example `log` format:
//!
//! ```ignore
//! # metadata v1: run = "42"
//! [0 | 10] "event-A"
//! [1 | 25] <BINARY BLOB of 512 bytes>
//! ```
//!
//! Example `ndjson` format:
//!
//! ```ignore
//! {"header":{"run":"42"}}
//! {"index":0,"offset":10,"payload":"event-A"}
//! ```
use anyhow::{bail, Result};
use clap::Parser;
use proio_stream::{DynSource, Event, Header, Reader};
use std::{fmt::Write as _, io::stdin, os::fd::AsFd, str::FromStr};

#[derive(Parser)]
struct Args {
    #[clap(help = "Container file to list, or - for stdin")]
    file: String,
    #[clap(short, long, help = "Input is gzip compressed")]
    gzip: bool,
    #[clap(short, long, help = "Print only the event with this index, skipping the ones before")]
    event: Option<u64>,
    #[clap(long, help = "If set, print the header and exit")]
    header_only: bool,
    #[clap(long, help = "The output format", default_value = "log")]
    format: Format,
}

#[derive(Clone)]
enum Format {
    Log,
    Ndjson,
}

fn main() -> Result<()> {
    env_logger::init();

    let Args {
        file,
        gzip,
        event,
        header_only,
        format,
    } = Args::parse();

    let source = if file == "-" {
        let fd = stdin().as_fd().try_clone_to_owned()?;
        DynSource::from_fd(fd, gzip)
    } else if gzip {
        DynSource::open_gzip(&file)?
    } else {
        DynSource::open(&file)?
    };
    let mut reader = Reader::new(source);

    // print the header; decode a detached copy so a stream with opaque
    // header bytes still lists fine
    let raw = reader.header()?.to_vec();
    match (&format, Header::decode(&raw)) {
        (Format::Log, Ok(header)) => {
            let mut line = String::from("# metadata v1");
            if !header.is_empty() {
                line.push(':');
                for (key, value) in header.entries() {
                    if let Ok(string) = std::str::from_utf8(value) {
                        write!(line, " {key} = {string:?}")?;
                    } else {
                        write!(line, " {key} = <{} bytes>", value.len())?;
                    }
                }
            }
            println!("{line}");
        }
        (Format::Log, Err(_)) => println!("# header: {} opaque bytes", raw.len()),
        (Format::Ndjson, Ok(header)) => {
            println!("{}", serde_json::json!({ "header": header }))
        }
        (Format::Ndjson, Err(_)) => {
            println!("{}", serde_json::json!({ "header_bytes": raw.len() }))
        }
    }

    if header_only {
        return Ok(());
    }

    if let Some(n) = event {
        let skipped = reader.skip(n)?;
        if skipped < n {
            bail!("the stream holds only {skipped} events");
        }
        match reader.next()? {
            Some(event) => print_event(&event, &format),
            None => bail!("the stream holds only {n} events"),
        }
        return Ok(());
    }

    for event in reader.events() {
        print_event(&event?, &format);
    }
    log::info!("Stream ended.");

    Ok(())
}

fn print_event(event: &Event, format: &Format) {
    match format {
        Format::Log => {
            print!("[{} | {}]", event.index(), event.offset());
            if let Ok(string) = std::str::from_utf8(event.payload()) {
                println!(" {string:?}");
            } else {
                println!(" <BINARY BLOB of {} bytes>", event.payload().len());
            }
        }
        Format::Ndjson => {
            let value = if let Ok(string) = std::str::from_utf8(event.payload()) {
                serde_json::json!({
                    "index": event.index(),
                    "offset": event.offset(),
                    "payload": string,
                })
            } else {
                serde_json::json!({
                    "index": event.index(),
                    "offset": event.offset(),
                    "payload": event.payload(),
                })
            };
            println!("{value}");
        }
    }
}

impl FromStr for Format {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "log" => Ok(Self::Log),
            "ndjson" => Ok(Self::Ndjson),
            _ => Err("Invalid Format"),
        }
    }
}
