use regex::Regex;
use std::sync::OnceLock;

/// Raw fields captured from one data line, exactly as the device printed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading<'a> {
    pub co2ppm: &'a str,
    pub humidity: &'a str,
    pub temperature: &'a str,
}

static LINE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn line_pattern() -> &'static Regex {
    LINE_PATTERN.get_or_init(|| {
        Regex::new(r"CO2=(?P<co2>\d+),HUM=(?P<hum>\d+\.\d+),TMP=(?P<tmp>-?\d+\.\d+)")
            .expect("static line pattern compiles")
    })
}

/// Returns `None` for anything that is not a data line (command echoes, banners, noise).
pub fn parse_line(line: &str) -> Option<Reading<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let caps = line_pattern().captures(line)?;
    Some(Reading {
        co2ppm: caps.name("co2")?.as_str(),
        humidity: caps.name("hum")?.as_str(),
        temperature: caps.name("tmp")?.as_str(),
    })
}
