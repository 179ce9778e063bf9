// Interface counter reads over a RouterOS connection.

use opsdeck_api::ApiRequest;
use serde_json::Value;

use crate::dedicated::DedicatedConnection;

const INTERFACE_PRINT: &str = "/interface/print";
const COUNTER_PROPLIST: &str = "name,rx-byte,tx-byte";

/// Cumulative byte counters of one interface at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

fn field<'a>(row: &'a Value, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

fn rows(reply: &Value) -> Result<&[Value], String> {
    reply
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| format!("expected a list of rows, got {reply}"))
}

/// Names of every interface that is not disabled, in device order.
pub(crate) async fn list_interfaces(conn: &DedicatedConnection) -> Result<Vec<String>, String> {
    let reply = conn
        .call(ApiRequest::get(INTERFACE_PRINT))
        .await
        .map_err(|e| e.to_string())?;
    parse_interface_names(&reply)
}

/// One batched read of all interface counters.
pub(crate) async fn sample(conn: &DedicatedConnection) -> Result<Vec<InterfaceCounters>, String> {
    let reply = conn
        .call(ApiRequest::get(INTERFACE_PRINT).param(".proplist", COUNTER_PROPLIST))
        .await
        .map_err(|e| e.to_string())?;
    parse_counters(&reply)
}

pub(crate) fn parse_interface_names(reply: &Value) -> Result<Vec<String>, String> {
    Ok(rows(reply)?
        .iter()
        .filter(|row| field(row, "disabled") != Some("true"))
        .filter_map(|row| field(row, "name").map(str::to_owned))
        .collect())
}

pub(crate) fn parse_counters(reply: &Value) -> Result<Vec<InterfaceCounters>, String> {
    rows(reply)?
        .iter()
        .map(|row| {
            let name = field(row, "name").ok_or("row without a name")?;
            let counter = |key: &str| -> Result<u64, String> {
                field(row, key)
                    .ok_or_else(|| format!("{name}: missing {key}"))?
                    .parse()
                    .map_err(|e| format!("{name}: bad {key}: {e}"))
            };
            Ok(InterfaceCounters {
                name: name.to_owned(),
                rx_bytes: counter("rx-byte")?,
                tx_bytes: counter("tx-byte")?,
            })
        })
        .collect()
}
