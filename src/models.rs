use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use surrealdb::sql::Datetime;

/// Raw record from CSV ingestion
#[derive(Debug, Deserialize)]
pub struct CsvRecord {
    pub load_id: String,
    pub customer_id: Option<String>,
    pub carrier_name: Option<String>,
    pub carrier_mode: String,
    pub origin_city: Option<String>,
    pub origin_state: Option<String>,
    pub origin_zip: Option<String>,
    pub destination_city: Option<String>,
    pub destination_state: Option<String>,
    pub destination_zip: Option<String>,
    pub pickup_date: String,
    pub delivery_date: Option<String>,
    pub miles: Option<f64>,
    pub weight: Option<f64>,
    pub customer_charge: Option<f64>,
    pub carrier_pay: Option<f64>,
    pub status: Option<String>,
}

/// Carrier mode enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum CarrierMode {
    LTL,
    Truckload,
    TLFlatbed,
    TLDry,
    Parcel,
    Intermodal,
}

impl From<&str> for CarrierMode {
    fn from(s: &str) -> Self {
        match s.trim() {
            "LTL" => CarrierMode::LTL,
            "TL Flatbed" | "Flatbed" => CarrierMode::TLFlatbed,
            "TL Dry" | "Dry Van" => CarrierMode::TLDry,
            "Parcel" => CarrierMode::Parcel,
            "Intermodal" => CarrierMode::Intermodal,
            _ => CarrierMode::Truckload, // default
        }
    }
}

impl fmt::Display for CarrierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CarrierMode::LTL => "LTL",
            CarrierMode::Truckload => "Truckload",
            CarrierMode::TLFlatbed => "TL Flatbed",
            CarrierMode::TLDry => "TL Dry",
            CarrierMode::Parcel => "Parcel",
            CarrierMode::Intermodal => "Intermodal",
        };
        f.write_str(label)
    }
}

/// One row of the wide shipment view. Dates are native SurrealDB datetimes
/// so the report date range can filter on them.
#[derive(Debug, Clone, Serialize)]
pub struct Shipment {
    pub load_id: String,
    pub customer_id: String,
    pub carrier_name: Option<String>,
    pub carrier_mode: String,
    pub origin_city: Option<String>,
    pub origin_state: Option<String>,
    pub origin_zip: Option<String>,
    pub destination_city: Option<String>,
    pub destination_state: Option<String>,
    pub destination_zip: Option<String>,
    pub pickup_date: Datetime,
    pub delivery_date: Option<Datetime>,
    pub miles: Option<f64>,
    pub weight: Option<f64>,
    pub customer_charge: Option<f64>,
    pub carrier_pay: Option<f64>,
    pub status: Option<String>,
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, RFC 3339, or a bare `YYYY-MM-DD`.
pub fn parse_csv_date(value: &str) -> anyhow::Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
}

impl CsvRecord {
    /// `tenant` is used when the record carries no customer id of its own.
    pub fn to_shipment(&self, tenant: Option<&str>) -> anyhow::Result<Shipment> {
        let customer_id = non_empty(&self.customer_id)
            .or_else(|| tenant.map(str::to_string))
            .ok_or_else(|| anyhow::anyhow!("record {} has no customer id", self.load_id))?;
        let pickup_date = parse_csv_date(&self.pickup_date)?;
        let delivery_date = match non_empty(&self.delivery_date) {
            Some(d) => Some(Datetime::from(parse_csv_date(&d)?)),
            None => None,
        };

        Ok(Shipment {
            load_id: self.load_id.clone(),
            customer_id,
            carrier_name: non_empty(&self.carrier_name),
            carrier_mode: CarrierMode::from(self.carrier_mode.as_str()).to_string(),
            origin_city: non_empty(&self.origin_city),
            origin_state: non_empty(&self.origin_state),
            origin_zip: non_empty(&self.origin_zip),
            destination_city: non_empty(&self.destination_city),
            destination_state: non_empty(&self.destination_state),
            destination_zip: non_empty(&self.destination_zip),
            pickup_date: Datetime::from(pickup_date),
            delivery_date,
            miles: self.miles,
            weight: self.weight,
            customer_charge: self.customer_charge,
            carrier_pay: self.carrier_pay,
            status: non_empty(&self.status),
        })
    }
}
