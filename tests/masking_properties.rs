//! Masking invariants over generated inputs

use proptest::prelude::*;
use serde_json::{json, Value};

use fleet_query::masking::MaskingLayer;
use fleet_query::QueryRows;

fn layer(hide_removed: bool) -> MaskingLayer {
    MaskingLayer::new(
        true,
        hide_removed,
        vec!["EONINFOTECH".into(), "EON INFOTECH".into()],
        vec!["EON OFFICE".into()],
    )
}

fn cell() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(json!("EONINFOTECH")),
        Just(json!(" eoninfotech ")),
        Just(json!("EON OFFICE")),
        Just(json!("Pune EON OFFICE yard")),
        Just(json!("Device Removed")),
        "[A-Za-z ]{0,12}".prop_map(Value::from),
        (0i64..100_000).prop_map(Value::from),
        Just(Value::Null),
    ]
}

fn projection() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(
        vec![
            "vm.reg_no",
            "hm.name AS plant_name",
            "dm.name AS region_name",
            "zm.zone_name",
            "vm.vehicle_no",
        ],
        1..=5,
    )
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Plain,
    DistinctOrdered,
    Grouped,
}

fn shape() -> impl Strategy<Value = Shape> {
    prop_oneof![Just(Shape::Plain), Just(Shape::DistinctOrdered), Just(Shape::Grouped)]
}

/// Projection item without its alias
fn bare(item: &str) -> &str {
    item.split(" AS ").next().unwrap_or(item)
}

fn hierarchy_sql(columns: &[&str], shape: Shape, reg: &str) -> String {
    let from = "FROM vehicle_master vm \
                JOIN hosp_master hm ON vm.id_hosp = hm.id_no \
                JOIN district_master dm ON hm.id_dist = dm.id_no \
                JOIN zone_master zm ON dm.id_zone = zm.id_no";
    let raw: Vec<&str> = columns.iter().map(|c| bare(c)).collect();
    match shape {
        Shape::Plain => format!(
            "SELECT {} {} WHERE vm.reg_no = '{}'",
            columns.join(", "),
            from,
            reg
        ),
        Shape::DistinctOrdered => format!(
            "SELECT DISTINCT {} {} WHERE vm.reg_no LIKE '{}%' ORDER BY {}",
            columns.join(", "),
            from,
            reg,
            raw.join(", ")
        ),
        Shape::Grouped => format!(
            "SELECT {}, COUNT(*) AS vehicles {} GROUP BY {}",
            columns.join(", "),
            from,
            raw.join(", ")
        ),
    }
}

proptest! {
    #[test]
    fn rewrite_is_idempotent(columns in projection(), shape in shape(), reg in "[A-Z]{2}[0-9]{4}") {
        let sql = hierarchy_sql(&columns, shape, &reg);
        let masking = layer(true);
        let once = masking.rewrite_sql(&sql);
        let twice = masking.rewrite_sql(&once);
        prop_assert_eq!(&once, &twice);

        let order_by = once.split(" ORDER BY ").nth(1).unwrap_or("");
        for wrapped in ["hm.name", "dm.name", "zm.zone_name"] {
            prop_assert!(!order_by.contains(wrapped), "{}", once);
        }
        if matches!(shape, Shape::Grouped) {
            prop_assert!(!once.contains("vehicle_status"), "{}", once);
        }
    }

    #[test]
    fn masked_rows_never_expose_literals(
        rows in prop::collection::vec(prop::collection::vec(cell(), 4), 0..20),
        hide_removed in any::<bool>(),
    ) {
        let columns = vec![
            "reg_no".to_string(),
            "plant_name".to_string(),
            "region_name".to_string(),
            "vehicle_status".to_string(),
        ];
        let masked = layer(hide_removed).mask_rows(QueryRows::new(columns, rows.clone()));

        prop_assert!(masked.data.rows.len() <= rows.len());
        for row in &masked.data.rows {
            for value in row {
                if let Value::String(s) = value {
                    prop_assert!(!s.trim().eq_ignore_ascii_case("EONINFOTECH"));
                    prop_assert!(!s.to_uppercase().contains("EON OFFICE"));
                }
            }
        }
    }
}
