use mongodb::bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::game_store::{Fields, collection_of};

/// Storage shape of every document: the path is the primary key and the
/// collection is denormalised for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    #[serde(rename = "_id")]
    pub path: String,
    pub collection: String,
    pub fields: Fields,
}

impl StoredDocument {
    pub fn new(path: &str, fields: Fields) -> Self {
        Self {
            path: path.to_owned(),
            collection: collection_of(path).to_owned(),
            fields,
        }
    }
}

pub fn doc_id(path: &str) -> Document {
    doc! {"_id": path}
}

/// Convert a JSON value into its BSON counterpart.
pub fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(flag) => Bson::Boolean(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => Bson::Int64(integer),
            None => Bson::Double(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => Bson::String(text.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(
            map.iter()
                .map(|(key, value)| (key.clone(), json_to_bson(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn integers_stay_integers() {
        let value = json!({"score": 4, "ratio": 0.5, "tags": ["a"], "key": null});
        let Bson::Document(converted) = json_to_bson(&value) else {
            panic!("expected a document");
        };
        assert_eq!(converted.get_i64("score").unwrap(), 4);
        assert_eq!(converted.get_f64("ratio").unwrap(), 0.5);
        assert_eq!(converted.get_array("tags").unwrap().len(), 1);
        assert!(matches!(converted.get("key"), Some(Bson::Null)));
    }
}
