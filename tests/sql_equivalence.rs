//! Grouped totals computed by SurrealDB must match the in-process engine.

use chrono::{TimeZone, Utc};
use freight_reports::config::StoreConfig;
use freight_reports::db::{self, DbConn, SurrealRowStore};
use freight_reports::models::Shipment;
use freight_reports::report::date_range::resolve;
use freight_reports::report::definition::{MetricConfig, SortDirection};
use freight_reports::report::executor::GroupValue;
use freight_reports::report::{ExecutionContext, InMemoryRowStore, ReportDefinition, Row, RowQuery, RowStore};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use surrealdb::sql::Datetime;

fn shipments() -> Vec<Row> {
    vec![
        json!({ "load_id": "L1", "customer_id": "acme", "pickup_date": "2024-02-01T08:00:00Z", "carrier_name": "Saia", "carrier_mode": "LTL", "origin_state": "CA", "destination_state": "TX", "miles": 1400, "weight": 800, "customer_charge": 1000, "carrier_pay": 800 }),
        json!({ "load_id": "L2", "customer_id": "acme", "pickup_date": "2024-03-11T08:00:00Z", "carrier_name": "Saia", "carrier_mode": "ltl consolidated", "origin_state": "CA", "destination_state": "TX", "miles": 1350, "weight": 2200, "customer_charge": 1500, "carrier_pay": 1100 }),
        json!({ "load_id": "L3", "customer_id": "acme", "pickup_date": "2024-04-02T08:00:00Z", "carrier_name": "Werner", "carrier_mode": "TL Dry", "origin_state": "NV", "destination_state": "AZ", "miles": 420, "weight": 30000, "customer_charge": 2600, "carrier_pay": 2000 }),
        json!({ "load_id": "L4", "customer_id": "acme", "pickup_date": "2024-05-20T08:00:00Z", "carrier_name": "Werner", "carrier_mode": "Truckload", "origin_state": "NV", "destination_state": "", "miles": 300, "weight": 12000, "customer_charge": 0, "carrier_pay": 250 }),
        json!({ "load_id": "L5", "customer_id": "acme", "pickup_date": "2024-06-09T08:00:00Z", "carrier_name": "", "carrier_mode": "Parcel", "destination_state": "TX", "miles": 75, "customer_charge": 90, "carrier_pay": 60 }),
        json!({ "load_id": "L6", "customer_id": "acme", "pickup_date": "2024-07-15T08:00:00Z", "carrier_mode": "LTL", "origin_state": "CA", "destination_state": "AZ", "weight": 950, "customer_charge": 700, "carrier_pay": 520 }),
        // outside the date range
        json!({ "load_id": "L7", "customer_id": "acme", "pickup_date": "2023-11-30T08:00:00Z", "carrier_name": "Saia", "carrier_mode": "LTL", "origin_state": "CA", "destination_state": "TX", "miles": 9999, "customer_charge": 9999, "carrier_pay": 1 }),
        // another tenant
        json!({ "load_id": "G1", "customer_id": "globex", "pickup_date": "2024-02-01T08:00:00Z", "carrier_name": "Saia", "carrier_mode": "LTL", "origin_state": "CA", "destination_state": "TX", "miles": 5000, "customer_charge": 5000, "carrier_pay": 10 }),
    ]
    .into_iter()
    .map(|v| v.as_object().cloned().unwrap())
    .collect()
}

fn definition() -> ReportDefinition {
    serde_json::from_value(json!({
        "sections": [],
        "dateRange": { "type": "custom", "customStart": "2024-01-01", "customEnd": "2024-12-31" },
        "categorization": {
            "name": "mode_group", "field": "carrier_mode", "default": "Other",
            "rules": [
                { "contains": "LTL", "category": "Less than truckload" },
                { "contains": ["tl", "truck"], "category": "Full truckload" }
            ]
        },
        "numericCategorization": {
            "name": "weight_band", "field": "weight",
            "ranges": [
                { "max": 1000, "category": "light" },
                { "min": 1000, "max": 15000, "category": "medium" },
                { "min": 15000, "category": "heavy" }
            ]
        },
        "calculatedFields": [
            { "name": "margin", "formula": "customer_charge - carrier_pay" },
            { "name": "margin_per_mile", "formula": "margin / miles" }
        ]
    }))
    .unwrap()
}

fn metric(field: &str, aggregation: &str) -> MetricConfig {
    serde_json::from_value(json!({ "field": field, "aggregation": aggregation, "label": field })).unwrap()
}

async fn seeded_store() -> SurrealRowStore {
    let config = StoreConfig::default();
    let db: DbConn = db::connect(&config).await.unwrap();
    db::init_schema(&db, &config).await.unwrap();
    for row in shipments() {
        db.query("CREATE type::table($table) CONTENT $row RETURN NONE")
            .bind(("table", config.table.clone()))
            .bind(("row", Value::Object(row)))
            .await
            .unwrap()
            .check()
            .unwrap();
    }
    db.query("UPDATE type::table($table) SET pickup_date = <datetime> pickup_date RETURN NONE")
        .bind(("table", config.table.clone()))
        .await
        .unwrap()
        .check()
        .unwrap();
    SurrealRowStore::new(db, config).unwrap()
}

/// Typed rows as ingest writes them: every measure is an `f64`.
fn float_shipments() -> Vec<Shipment> {
    let ship = |load_id: &str, tenant: &str, carrier: Option<&str>, mode: &str, month: u32, miles: Option<f64>, weight: Option<f64>, charge: f64, pay: f64| Shipment {
        load_id: load_id.into(),
        customer_id: tenant.into(),
        carrier_name: carrier.map(Into::into),
        carrier_mode: mode.into(),
        origin_city: None,
        origin_state: Some("CA".into()),
        origin_zip: None,
        destination_city: None,
        destination_state: Some("TX".into()),
        destination_zip: None,
        pickup_date: Datetime::from(Utc.with_ymd_and_hms(2024, month, 3, 8, 0, 0).unwrap()),
        delivery_date: None,
        miles,
        weight,
        customer_charge: Some(charge),
        carrier_pay: Some(pay),
        status: None,
    };
    vec![
        ship("F1", "acme", Some("Saia"), "LTL", 2, Some(300.0), Some(800.5), 1000.0, 800.25),
        ship("F2", "acme", Some("Saia"), "LTL", 3, Some(300.0), Some(1200.0), 450.5, 300.0),
        ship("F3", "acme", Some("Werner"), "TL Dry", 4, Some(1400.5), Some(30000.0), 2600.0, 2000.0),
        ship("F4", "acme", Some("Saia"), "Truckload", 5, Some(1400.5), Some(12000.0), 0.0, 250.75),
        ship("F5", "acme", None, "Parcel", 6, None, Some(75.0), 90.0, 60.0),
        ship("F6", "acme", Some("Werner"), "LTL", 7, Some(0.5), None, 700.0, 520.0),
        ship("G1", "globex", Some("Saia"), "LTL", 2, Some(300.0), Some(800.0), 5000.0, 10.0),
    ]
}

fn as_row(shipment: &Shipment) -> Row {
    serde_json::to_value(shipment).unwrap().as_object().cloned().unwrap()
}

async fn in_process(def: &ReportDefinition, group_by: &str, metric: &MetricConfig) -> Vec<GroupValue> {
    in_process_over(shipments(), def, group_by, metric).await
}

async fn in_process_over(rows: Vec<Row>, def: &ReportDefinition, group_by: &str, metric: &MetricConfig) -> Vec<GroupValue> {
    let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    let range = resolve(&def.date_range, now).unwrap();
    let store = InMemoryRowStore::new(rows, "customer_id", "pickup_date");
    let mut rows = store.fetch(&RowQuery::new("acme", range, 0)).await.unwrap();
    let ctx = ExecutionContext::new(def);
    ctx.prepare_rows(&mut rows);
    ctx.ranked_groups(&rows, group_by, metric, None, None)
}

fn by_name(groups: Vec<GroupValue>) -> BTreeMap<String, (f64, usize)> {
    groups.into_iter().map(|g| (g.name, (g.value, g.count))).collect()
}

fn assert_same(label: &str, expected: Vec<GroupValue>, actual: Vec<GroupValue>) {
    let (expected, actual) = (by_name(expected), by_name(actual));
    assert_eq!(
        expected.keys().collect::<Vec<_>>(),
        actual.keys().collect::<Vec<_>>(),
        "{label}: group keys differ"
    );
    for (name, (value, count)) in &expected {
        let (sql_value, sql_count) = actual[name];
        assert!(
            (value - sql_value).abs() < 1e-9,
            "{label}/{name}: in-process {value} vs database {sql_value}"
        );
        assert_eq!(*count, sql_count, "{label}/{name}: row counts differ");
    }
}

#[tokio::test]
async fn grouped_totals_match_in_process_results() {
    let def = definition();
    let store = seeded_store().await;
    let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    let range = resolve(&def.date_range, now).unwrap();

    let group_keys = ["carrier_name", "mode_group", "weight_band", "lane", "destination_state"];
    let metrics = [
        metric("miles", "sum"),
        metric("customer_charge", "avg"),
        metric("load_id", "count"),
        metric("weight", "min"),
        metric("carrier_pay", "max"),
        metric("margin", "sum"),
    ];

    for group_by in group_keys {
        for m in &metrics {
            let label = format!("{group_by}/{:?}({})", m.aggregation, m.field);
            let expected = in_process(&def, group_by, m).await;
            let actual = store.grouped_totals(&def, group_by, m, "acme", range).await.unwrap();
            assert_same(&label, expected, actual);
        }
    }
}

#[tokio::test]
async fn computations_and_guarded_formulas_match() {
    let def = definition();
    let store = seeded_store().await;
    let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    let range = resolve(&def.date_range, now).unwrap();

    let ratio: MetricConfig = serde_json::from_value(json!({
        "field": "x", "aggregation": "sum", "label": "Charge per load",
        "computation": { "field1": "customer_charge", "agg1": "sum", "field2": "load_id", "agg2": "count", "type": "divide" }
    }))
    .unwrap();
    let per_mile = metric("margin_per_mile", "sum");

    for m in [&ratio, &per_mile] {
        let expected = in_process(&def, "mode_group", m).await;
        let actual = store.grouped_totals(&def, "mode_group", m, "acme", range).await.unwrap();
        assert_same(&m.label, expected, actual);
    }
}

#[tokio::test]
async fn fetch_is_tenant_and_date_scoped() {
    let def = definition();
    let store = seeded_store().await;
    let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    let range = resolve(&def.date_range, now).unwrap();

    let mut query = RowQuery::new("acme", range, 0);
    query.order_by = Some(("miles".into(), SortDirection::Desc));
    query.limit = Some(2);
    let rows = store.fetch(&query).await.unwrap();

    let ids: Vec<&str> = rows.iter().map(|r| r["load_id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["L1", "L2"]);
    assert!(rows.iter().all(|r| !r.contains_key("id")));

    // L5 has no weight and must come last, or not at all under a tight limit.
    let memory = InMemoryRowStore::new(shipments(), "customer_id", "pickup_date");
    let load_ids = |rows: Vec<Row>| -> Vec<String> {
        rows.iter().map(|r| r["load_id"].as_str().unwrap().to_string()).collect()
    };
    for (direction, limit, expected) in [
        (SortDirection::Asc, 2, vec!["L1", "L6"]),
        (SortDirection::Asc, 6, vec!["L1", "L6", "L2", "L4", "L3", "L5"]),
        (SortDirection::Desc, 2, vec!["L3", "L4"]),
        (SortDirection::Desc, 10, vec!["L3", "L4", "L2", "L6", "L1", "L5"]),
    ] {
        let mut query = RowQuery::new("acme", range, 0);
        query.order_by = Some(("weight".into(), direction));
        query.limit = Some(limit);
        let from_db = load_ids(store.fetch(&query).await.unwrap());
        assert_eq!(from_db, expected, "{direction:?} limit {limit}");
        assert_eq!(load_ids(memory.fetch(&query).await.unwrap()), from_db);
    }
}

#[tokio::test]
async fn float_typed_rows_group_identically() {
    let def = definition();
    let config = StoreConfig::default();
    let db: DbConn = db::connect(&config).await.unwrap();
    db::init_schema(&db, &config).await.unwrap();
    for shipment in float_shipments() {
        db::insert_shipment(&db, &config, &shipment).await.unwrap();
    }
    let store = SurrealRowStore::new(db, config).unwrap();
    let rows: Vec<Row> = float_shipments().iter().map(as_row).collect();
    let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    let range = resolve(&def.date_range, now).unwrap();

    let miles_keys: Vec<String> = by_name(in_process_over(rows.clone(), &def, "miles", &metric("load_id", "count")).await)
        .into_keys()
        .collect();
    assert_eq!(miles_keys, vec!["0.5", "1400.5", "300", "Other"]);

    let group_keys = ["miles", "weight", "carrier_name", "mode_group", "weight_band"];
    let metrics = [
        metric("load_id", "count"),
        metric("carrier_name", "countDistinct"),
        metric("miles", "countDistinct"),
        metric("customer_charge", "sum"),
        metric("weight", "avg"),
        metric("margin", "sum"),
    ];
    for group_by in group_keys {
        for m in &metrics {
            let label = format!("{group_by}/{:?}({})", m.aggregation, m.field);
            let expected = in_process_over(rows.clone(), &def, group_by, m).await;
            let actual = store.grouped_totals(&def, group_by, m, "acme", range).await.unwrap();
            assert_same(&label, expected, actual);
        }
    }
}
