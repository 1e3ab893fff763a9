//! Capture aggregation: ordered contributions, reducers, and incremental
//! re-invalidation of the aggregator.

use std::any::Any;
use std::rc::Rc;

use weft_core::{
    descriptor_eq, CallCx, CaptureKey, Descriptor, FibreRuntime, Key, KeyPath,
    RecordingObserver, Result, Value, WeftError,
};

fn motor() -> CaptureKey {
    CaptureKey::new("motor")
}

fn path(keys: Vec<Key>) -> KeyPath {
    keys.into_iter().collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Reducer {
    First,
    Sum,
}

impl Reducer {
    fn reduce(self, contributions: &[Value]) -> Value {
        match self {
            Self::First => contributions.first().cloned().unwrap_or(Value::Unit),
            Self::Sum => Value::from(
                contributions
                    .iter()
                    .filter_map(Value::as_float)
                    .sum::<f64>(),
            ),
        }
    }
}

/// Registers the capture, evaluates its children, then reduces the
/// collected contributions.
#[derive(Debug, Clone)]
struct Aggregator {
    reducer: Reducer,
    children: Vec<Rc<dyn Descriptor>>,
}

impl Aggregator {
    fn new(reducer: Reducer, children: Vec<Rc<dyn Descriptor>>) -> Self {
        Self { reducer, children }
    }
}

impl PartialEq for Aggregator {
    fn eq(&self, other: &Self) -> bool {
        self.reducer == other.reducer
            && weft_core::descriptor_slice_eq(&self.children, &other.children)
    }
}

impl Descriptor for Aggregator {
    fn type_name(&self) -> &'static str {
        "Aggregator"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        cx.provide_capture(&motor())?;
        for (index, child) in self.children.iter().enumerate() {
            cx.evaluate_child(index as u64, Rc::clone(child))?;
        }
        let contributions = cx.collect_capture(&motor())?;
        Ok(self.reducer.reduce(&contributions))
    }
}

/// Contributes a value to the nearest motor aggregator.
#[derive(Debug, Clone, PartialEq)]
struct Demand {
    value: f64,
}

impl Descriptor for Demand {
    fn type_name(&self) -> &'static str {
        "Demand"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        cx.use_capture(&motor(), self.value)?;
        Ok(Value::Unit)
    }
}

/// Contributes through an intermediate layer, to exercise pre-order depth.
#[derive(Debug, Clone)]
struct Nested {
    child: Rc<dyn Descriptor>,
}

impl Nested {
    fn new(child: impl Descriptor) -> Self {
        Self {
            child: Rc::new(child),
        }
    }
}

impl PartialEq for Nested {
    fn eq(&self, other: &Self) -> bool {
        self.child.eq_descriptor(&*other.child)
    }
}

impl Descriptor for Nested {
    fn type_name(&self) -> &'static str {
        "Nested"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        cx.evaluate_child("inner", Rc::clone(&self.child))
    }
}

/// Conditionally mounts its contributor.
#[derive(Debug, Clone)]
struct Maybe {
    show: bool,
    child: Rc<dyn Descriptor>,
}

impl Maybe {
    fn new(show: bool, child: impl Descriptor) -> Self {
        Self {
            show,
            child: Rc::new(child),
        }
    }
}

impl PartialEq for Maybe {
    fn eq(&self, other: &Self) -> bool {
        self.show == other.show && self.child.eq_descriptor(&*other.child)
    }
}

impl Descriptor for Maybe {
    fn type_name(&self) -> &'static str {
        "Maybe"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        if self.show {
            cx.evaluate_child("inner", Rc::clone(&self.child))
        } else {
            Ok(Value::Unit)
        }
    }
}

#[test]
fn empty_capture_reduces_over_nothing() {
    let mut rt = FibreRuntime::new(Aggregator::new(Reducer::Sum, vec![]));
    assert_eq!(rt.run_tick().unwrap(), Value::from(0.0));
}

#[test]
fn first_reducer_takes_the_preorder_head() {
    // S5: contributions [-1.0, 0.5] in pre-order reduce to -1.0.
    let mut rt = FibreRuntime::new(Aggregator::new(
        Reducer::First,
        vec![
            Rc::new(Demand { value: -1.0 }),
            Rc::new(Demand { value: 0.5 }),
        ],
    ));
    assert_eq!(rt.run_tick().unwrap(), Value::from(-1.0));
}

#[test]
fn removing_the_first_contributor_reinvalidates_the_aggregator_only() {
    // S5, second half: dropping the first contributor leaves 0.5, and the
    // surviving contributor is not re-invoked.
    let observer = RecordingObserver::new();
    let mut rt = FibreRuntime::new(Aggregator::new(
        Reducer::First,
        vec![
            Rc::new(Maybe::new(true, Demand { value: -1.0 })),
            Rc::new(Demand { value: 0.5 }),
        ],
    ));
    rt.on_event(observer.clone());
    assert_eq!(rt.run_tick().unwrap(), Value::from(-1.0));
    observer.take();

    rt.update_root(Aggregator::new(
        Reducer::First,
        vec![
            Rc::new(Maybe::new(false, Demand { value: -1.0 })),
            Rc::new(Demand { value: 0.5 }),
        ],
    ));
    assert_eq!(rt.run_tick().unwrap(), Value::from(0.5));

    let evaluated = observer.evaluated_paths();
    assert!(!evaluated.contains(&path(vec![1u64.into()])));
    assert!(rt
        .export()
        .find(&path(vec![0u64.into(), "inner".into()]))
        .is_none());
}

#[test]
fn contributions_arrive_in_preorder_by_child_order() {
    // A deep contributor under child 0 still precedes a shallow one under
    // child 1.
    let mut rt = FibreRuntime::new(Aggregator::new(
        Reducer::First,
        vec![
            Rc::new(Nested::new(Demand { value: 1.0 })),
            Rc::new(Demand { value: 2.0 }),
        ],
    ));
    assert_eq!(rt.run_tick().unwrap(), Value::from(1.0));
}

#[test]
fn sum_reducer_sees_every_contribution() {
    let mut rt = FibreRuntime::new(Aggregator::new(
        Reducer::Sum,
        vec![
            Rc::new(Demand { value: 1.5 }),
            Rc::new(Nested::new(Demand { value: 2.0 })),
            Rc::new(Demand { value: 0.5 }),
        ],
    ));
    assert_eq!(rt.run_tick().unwrap(), Value::from(4.0));
}

#[test]
fn changed_contribution_updates_the_aggregate() {
    let observer = RecordingObserver::new();
    let mut rt = FibreRuntime::new(Aggregator::new(
        Reducer::Sum,
        vec![
            Rc::new(Demand { value: 1.0 }),
            Rc::new(Demand { value: 2.0 }),
        ],
    ));
    rt.on_event(observer.clone());
    assert_eq!(rt.run_tick().unwrap(), Value::from(3.0));
    observer.take();

    rt.update_root(Aggregator::new(
        Reducer::Sum,
        vec![
            Rc::new(Demand { value: 5.0 }),
            Rc::new(Demand { value: 2.0 }),
        ],
    ));
    assert_eq!(rt.run_tick().unwrap(), Value::from(7.0));

    // The unchanged contributor was not re-invoked.
    assert!(!observer
        .evaluated_paths()
        .contains(&path(vec![1u64.into()])));
}

#[test]
fn duplicate_contribution_per_fibre_fails() {
    #[derive(Debug, Clone, PartialEq)]
    struct Greedy;

    impl Descriptor for Greedy {
        fn type_name(&self) -> &'static str {
            "Greedy"
        }

        fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
            descriptor_eq(self, other)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
            cx.use_capture(&motor(), 1.0)?;
            cx.use_capture(&motor(), 2.0)?;
            Ok(Value::Unit)
        }
    }

    let mut rt = FibreRuntime::new(Aggregator::new(Reducer::Sum, vec![Rc::new(Greedy)]));
    match rt.run_tick() {
        Err(WeftError::DuplicateCapture { name, .. }) => assert_eq!(&*name, "motor"),
        other => panic!("expected DuplicateCapture, got {other:?}"),
    }
}

#[test]
fn contribution_without_an_aggregator_fails() {
    let mut rt = FibreRuntime::new(Demand { value: 1.0 });
    assert!(matches!(
        rt.run_tick(),
        Err(WeftError::MissingContext { .. })
    ));
}

#[test]
fn collector_fibre_depends_on_its_contributors() {
    let mut rt = FibreRuntime::new(Aggregator::new(
        Reducer::Sum,
        vec![Rc::new(Demand { value: 1.0 })],
    ));
    rt.run_tick().unwrap();

    let snapshot = rt.export();
    let collector = snapshot
        .find(&path(vec!["__capture.motor".into()]))
        .expect("collector exported");
    assert!(collector.predecessors.contains(&path(vec![0u64.into()])));

    // And the aggregator depends on the collector.
    let root = snapshot.find(&KeyPath::root()).expect("root exported");
    assert!(root
        .predecessors
        .contains(&path(vec!["__capture.motor".into()])));
}
