//! Property tests for flattening and decoding.

use keeper_config::codec::{decode, decode_value, flatten, flatten_serializable};
use keeper_config::store::KvPair;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct Database {
    host: String,
    port: u16,
    timeout: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct Service {
    name: String,
    replicas: u32,
    offset: i64,
    enabled: bool,
    ports: Vec<u16>,
    primary: Database,
}

fn service_strategy() -> impl Strategy<Value = Service> {
    (
        "[a-zA-Z][a-zA-Z0-9 .-]{0,16}",
        any::<u32>(),
        any::<i64>(),
        any::<bool>(),
        prop::collection::vec(any::<u16>(), 0..6),
        "[a-z][a-z0-9.]{0,12}",
        any::<u16>(),
        -1.0e6f64..1.0e6,
    )
        .prop_map(
            |(name, replicas, offset, enabled, ports, host, port, timeout)| Service {
                name,
                replicas,
                offset,
                enabled,
                ports,
                primary: Database { host, port, timeout },
            },
        )
}

fn leaf_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.iter().map(leaf_count).sum(),
        Value::Object(fields) => fields.values().map(leaf_count).sum(),
        _ => 1,
    }
}

proptest! {
    #[test]
    fn prop_round_trip(service in service_strategy()) {
        let pairs = flatten_serializable("edgex/svc", &service).unwrap();
        let mut decoded = Service::default();
        decode("edgex/svc", &pairs, &mut decoded).unwrap();
        prop_assert_eq!(decoded, service);
    }

    #[test]
    fn prop_one_pair_per_leaf(service in service_strategy()) {
        let value = serde_json::to_value(&service).unwrap();
        let pairs = flatten("svc", &value).unwrap();
        prop_assert_eq!(pairs.len(), leaf_count(&value));
        prop_assert!(pairs.iter().all(|pair| pair.key.starts_with("svc/")));
        prop_assert!(pairs.iter().all(|pair| pair.value.is_string()));
    }

    #[test]
    fn prop_decode_is_idempotent(service in service_strategy(), replicas in any::<u32>()) {
        let pairs = vec![KvPair::new("svc/Replicas", replicas.to_string())];

        let mut once = service.clone();
        decode("svc", &pairs, &mut once).unwrap();
        let mut twice = once.clone();
        decode("svc", &pairs, &mut twice).unwrap();

        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.replicas, replicas);
    }

    #[test]
    fn prop_single_leaf_merge_keeps_other_fields(
        service in service_strategy(),
        host in "[a-z]{1,10}",
    ) {
        let mut target = service.clone();
        decode("svc", &[KvPair::new("svc/Primary/Host", host.clone())], &mut target).unwrap();

        let mut expected = service;
        expected.primary.host = host;
        prop_assert_eq!(target, expected);
    }

    #[test]
    fn prop_undeclared_keys_are_ignored(
        service in service_strategy(),
        extras in prop::collection::vec(("[a-z]{1,3}(/[a-z0-9]{1,3}){0,2}", "[a-z0-9]{0,4}"), 0..8),
    ) {
        let pairs: Vec<KvPair> = extras
            .iter()
            .map(|(key, value)| KvPair::new(format!("svc/Extra/{}", key), value.clone()))
            .collect();

        let mut target = service.clone();
        decode("svc", &pairs, &mut target).unwrap();
        prop_assert_eq!(target, service);
    }

    #[test]
    fn prop_value_tree_round_trip(service in service_strategy()) {
        let pairs = flatten_serializable("cfg", &service).unwrap();
        let mut tree = Value::Null;
        decode_value("cfg", &pairs, &mut tree).unwrap();
        prop_assert_eq!(flatten("cfg", &tree).unwrap().len(), pairs.len());
    }
}
