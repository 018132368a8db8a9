use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use maxminddb::{MaxMindDBError, Reader};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum GeoIpError {
    #[error("Failed to open GeoIP database: {0}")]
    DatabaseOpenError(MaxMindDBError),
    #[error("GeoIP lookup failed: {0}")]
    LookupError(MaxMindDBError),
}

/// Country and city, by their English names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub city: String,
}

pub struct GeoIpClient {
    reader: Reader<Vec<u8>>,
}

impl GeoIpClient {
    /// Loads the whole database in memory.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, GeoIpError> {
        let db_path = db_path.as_ref();
        debug!("Attempting to open GeoIP database at: {:?}", db_path);

        let reader = Reader::open_readfile(db_path).map_err(GeoIpError::DatabaseOpenError)?;
        info!("Successfully opened GeoIP database");

        Ok(GeoIpClient { reader })
    }

    /// Resolves an address to its location. Addresses that can't be located
    /// (garbage, loopback, or unknown to the database) give `Ok(None)`.
    pub fn locate(&self, ip: &str) -> Result<Option<Location>, GeoIpError> {
        let Some(ip) = parse_ip(ip) else {
            return Ok(None);
        };

        match self.reader.lookup::<Value>(ip) {
            Ok(city) => Ok(extract_location(&city)),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
            Err(e) => Err(GeoIpError::LookupError(e)),
        }
    }
}

fn parse_ip(ip: &str) -> Option<IpAddr> {
    let res = IpAddr::from_str(ip.trim()).ok()?;

    if res.is_loopback() {
        None
    } else {
        Some(res)
    }
}

const COUNTRY_PATH: &[&str] = &["country", "names", "en"];
const CITY_PATH: &[&str] = &["city", "names", "en"];

fn get_nested_value<'a>(data: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = data;
    for &key in path {
        current = current.get(key)?;
    }
    current.as_str()
}

fn extract_location(city: &Value) -> Option<Location> {
    let country = get_nested_value(city, COUNTRY_PATH).unwrap_or_default();
    let city = get_nested_value(city, CITY_PATH).unwrap_or_default();
    if country.is_empty() && city.is_empty() {
        return None;
    }
    Some(Location {
        country: country.to_string(),
        city: city.to_string(),
    })
}
