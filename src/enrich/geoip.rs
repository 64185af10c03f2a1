//! IPv4 → location lookup from an IP2Location LITE DB11 CSV file

use crate::enrich::{Enricher, RowRef};
use crate::error::Result;
use crate::melt::types::Cell;
use crate::BatchContext;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{info, warn};

/// File name of the IP2Location LITE DB11 table inside the geo-IP directory
pub const GEOIP_FILE: &str = "IP2LOCATION-LITE-DB11.CSV";

/// Location columns, in the order the CSV stores them after the range
pub const GEO_COLUMNS: [&str; 8] = [
    "country_code",
    "country_name",
    "region_name",
    "city_name",
    "latitude",
    "longitude",
    "zip_code",
    "time_zone",
];

/// Columns holding dotted IPv4 addresses
pub const IP_COLUMNS: &[&str] = &["ip", "lastip"];

#[derive(Debug, Clone, PartialEq)]
struct GeoRange {
    from: u32,
    to: u32,
    location: [String; 8],
}

/// Sorted, non-overlapping address ranges
#[derive(Debug, Clone, Default)]
pub struct GeoIpTable {
    ranges: Vec<GeoRange>,
}

impl GeoIpTable {
    /// Load `IP2LOCATION-LITE-DB11.CSV` from `dir`, or `None` if it is absent
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Option<Self>> {
        let path = dir.as_ref().join(GEOIP_FILE);
        if !path.exists() {
            warn!(path = %path.display(), "No GeoIP csv data; IP addresses will not be converted into locations");
            return Ok(None);
        }
        let table = Self::from_reader(std::fs::File::open(&path)?)?;
        info!(path = %path.display(), ranges = table.len(), "Loaded GeoIP table");
        Ok(Some(table))
    }

    /// Read a headerless DB11 CSV: ip_from, ip_to, then the location columns
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut ranges = Vec::new();
        for record in reader.records() {
            let record = record?;
            let bound = |i: usize| record.get(i).and_then(|v| v.trim().parse::<u32>().ok());
            let (Some(from), Some(to)) = (bound(0), bound(1)) else {
                continue;
            };
            let location = std::array::from_fn(|i| record.get(i + 2).unwrap_or("").to_string());
            ranges.push(GeoRange { from, to, location });
        }
        ranges.sort_by_key(|r| r.from);
        Ok(GeoIpTable { ranges })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Location columns for a dotted IPv4 address
    pub fn lookup(&self, ip: &str) -> Option<&[String; 8]> {
        let address = u32::from(ip.trim().parse::<Ipv4Addr>().ok()?);
        let position = self.ranges.partition_point(|r| r.from <= address);
        let range = self.ranges.get(position.checked_sub(1)?)?;
        (range.to >= address).then_some(&range.location)
    }
}

/// Adds location columns for IP address columns
pub struct GeoIpEnricher {
    table: GeoIpTable,
}

impl GeoIpEnricher {
    pub fn new(table: GeoIpTable) -> Self {
        GeoIpEnricher { table }
    }

    /// `ip` keeps the plain `geoip_` prefix, other columns get their own
    fn prefix(col: &str) -> String {
        if col == "ip" {
            String::from("geoip")
        } else {
            format!("{}_geoip", col)
        }
    }
}

impl Enricher for GeoIpEnricher {
    fn name(&self) -> &'static str {
        "geoip"
    }

    fn enrich(&self, row: &RowRef<'_>, _ctx: &mut BatchContext) -> Result<Vec<(String, Cell)>> {
        let mut out = Vec::new();
        for &col in IP_COLUMNS {
            let Some(value) = row.row.get(col) else {
                continue;
            };
            let ip = value.to_string();
            let location = if ip.trim().is_empty() {
                None
            } else {
                let found = self.table.lookup(&ip);
                if found.is_none() {
                    warn!(document = row.document, table = row.table, ip = %ip, "Bad ip?");
                }
                found
            };

            let prefix = Self::prefix(col);
            for (i, name) in GEO_COLUMNS.iter().enumerate() {
                let cell = location
                    .map(|loc| Cell::Text(loc[i].clone()))
                    .unwrap_or(Cell::Null);
                out.push((format!("{}_{}", prefix, name), cell));
            }
        }
        Ok(out)
    }
}
