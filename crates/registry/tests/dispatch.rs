//! Property test pitting the listener dispatch cache against naive
//! evaluation of every filter on every event.

use std::sync::{Arc, Mutex};

use plexus_registry::{
	Filter, PropertyMap, ServiceEvent, ServiceEventKind, ServiceRegistry, Value,
};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
	Register { classes: Vec<String>, name: String },
	SetName { slot: usize, name: String },
	Unregister { slot: usize },
}

fn arb_name() -> impl Strategy<Value = String> {
	prop::sample::select(vec!["x".to_string(), "y".to_string(), "z".to_string()])
}

fn arb_op() -> impl Strategy<Value = Op> {
	prop_oneof![
		(
			prop::sample::subsequence(
				vec!["A".to_string(), "B".to_string(), "C".to_string()],
				1..=3,
			),
			arb_name(),
		)
			.prop_map(|(classes, name)| Op::Register { classes, name }),
		(any::<usize>(), arb_name()).prop_map(|(slot, name)| Op::SetName { slot, name }),
		any::<usize>().prop_map(|slot| Op::Unregister { slot }),
	]
}

/// Filter shapes spanning every classification: simple leaves, conjunctive
/// simples, disjunctions, and complicated trees the cache cannot index.
fn arb_filter_text() -> impl Strategy<Value = String> {
	let leaf = prop_oneof![
		prop::sample::select(vec!["A", "B", "C"]).prop_map(|c| format!("(objectClass={c})")),
		(0..6i64).prop_map(|i| format!("(service.id={i})")),
		Just("(service.id=003)".to_string()),
		prop::sample::select(vec!["x", "y"]).prop_map(|v| format!("(name={v})")),
		Just("(name=*)".to_string()),
	];
	leaf.prop_recursive(2, 8, 3, |inner| {
		prop_oneof![
			prop::collection::vec(inner.clone(), 1..3)
				.prop_map(|args| format!("(&{})", args.concat())),
			prop::collection::vec(inner.clone(), 1..3)
				.prop_map(|args| format!("(|{})", args.concat())),
			inner.prop_map(|arg| format!("(!{arg})")),
		]
	})
}

type Log = Arc<Mutex<Vec<(ServiceEventKind, u64)>>>;

fn recorder(log: &Log) -> plexus_registry::ServiceListener {
	let log = Arc::clone(log);
	Box::new(move |event: &ServiceEvent| {
		log.lock()
			.unwrap()
			.push((event.kind, event.reference.id().get()));
	})
}

fn accepts(filter: Option<&Filter>, props: &PropertyMap) -> bool {
	filter.is_none_or(|f| f.matches(props))
}

proptest! {
	/// Every listener receives exactly the events naive evaluation of its
	/// filter predicts, regardless of how the cache classified it.
	#[test]
	fn cached_dispatch_equals_naive_dispatch(
		filter_texts in prop::collection::vec(arb_filter_text(), 0..5),
		ops in prop::collection::vec(arb_op(), 1..12),
	) {
		let registry = ServiceRegistry::new();
		let publisher = registry.new_owner();
		let watcher = registry.new_owner();

		// One unfiltered listener plus the generated shapes.
		let mut filters: Vec<Option<Filter>> = vec![None];
		for text in &filter_texts {
			filters.push(Some(Filter::parse(text).unwrap()));
		}

		let logs: Vec<Log> = filters.iter().map(|_| Log::default()).collect();
		for (i, (filter, log)) in filters.iter().zip(&logs).enumerate() {
			registry.add_listener(watcher, i as u64, filter.clone(), recorder(log));
		}

		let mut expected: Vec<Vec<(ServiceEventKind, u64)>> =
			vec![Vec::new(); filters.len()];
		let mut live = Vec::new();

		for op in ops {
			match op {
				Op::Register { classes, name } => {
					let classes: Vec<&str> = classes.iter().map(String::as_str).collect();
					let props: PropertyMap =
						[("name".to_string(), Value::Str(name))].into_iter().collect();
					let reference = registry.register(publisher, &classes, props).unwrap();
					let snapshot = registry.properties(reference).unwrap();
					for (i, filter) in filters.iter().enumerate() {
						if accepts(filter.as_ref(), &snapshot) {
							expected[i]
								.push((ServiceEventKind::Registered, reference.id().get()));
						}
					}
					live.push(reference);
				}
				Op::SetName { slot, name } => {
					if live.is_empty() {
						continue;
					}
					let reference = live[slot % live.len()];
					let old = registry.properties(reference).unwrap();
					let props: PropertyMap =
						[("name".to_string(), Value::Str(name))].into_iter().collect();
					registry.set_properties(reference, props).unwrap();
					let new = registry.properties(reference).unwrap();
					for (i, filter) in filters.iter().enumerate() {
						let matched_old = accepts(filter.as_ref(), &old);
						let matched_new = accepts(filter.as_ref(), &new);
						if matched_new {
							expected[i]
								.push((ServiceEventKind::Modified, reference.id().get()));
						} else if matched_old {
							expected[i].push((
								ServiceEventKind::ModifiedEndmatch,
								reference.id().get(),
							));
						}
					}
				}
				Op::Unregister { slot } => {
					if live.is_empty() {
						continue;
					}
					let reference = live.remove(slot % live.len());
					let snapshot = registry.properties(reference).unwrap();
					registry.unregister(reference);
					for (i, filter) in filters.iter().enumerate() {
						if accepts(filter.as_ref(), &snapshot) {
							expected[i]
								.push((ServiceEventKind::Unregistering, reference.id().get()));
						}
					}
				}
			}
		}

		for (log, expected) in logs.iter().zip(&expected) {
			prop_assert_eq!(&*log.lock().unwrap(), expected);
		}
	}
}
