//! Tick scheduling: evaluation order, effect-driven re-ticks, analysis
//! mode, external invalidation, and teardown.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use weft_core::{
    deps, descriptor_eq, CallCx, Descriptor, FibreRuntime, FnDescriptor, InvalidateReason, Key,
    KeyPath, RecordingObserver, Result, Setter, Value,
};

fn path(keys: &[&str]) -> KeyPath {
    keys.iter().copied().collect()
}

fn return_props(props: &Value, _cx: &mut CallCx<'_>) -> Result<Value> {
    Ok(props.clone())
}

/// Counter that starts itself from an effect: the setter fires during the
/// post-commit phase and must land in the *next* tick.
#[derive(Debug, Clone)]
struct SelfStart {
    target: i64,
}

impl PartialEq for SelfStart {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

impl Descriptor for SelfStart {
    fn type_name(&self) -> &'static str {
        "SelfStart"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        let (value, setter) = cx.use_state(0)?;
        let target = self.target;
        cx.use_effect(deps![], move |_| setter.set(target))?;
        Ok(value)
    }
}

#[test]
fn effect_setter_schedules_the_next_tick() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut rt = FibreRuntime::new(SelfStart { target: 42 });

    // The first tick commits 0; the effect's write is buffered.
    assert_eq!(rt.run_tick().unwrap(), Value::from(0));
    assert!(rt.needs_tick());

    assert_eq!(rt.run_tick().unwrap(), Value::from(42));
    assert!(!rt.needs_tick());
}

/// Deep chain: each level wraps the next, result bubbles up.
#[derive(Debug, Clone)]
struct Chain {
    levels: u32,
    leaf: Rc<dyn Descriptor>,
}

impl PartialEq for Chain {
    fn eq(&self, other: &Self) -> bool {
        self.levels == other.levels && self.leaf.eq_descriptor(&*other.leaf)
    }
}

impl Descriptor for Chain {
    fn type_name(&self) -> &'static str {
        "Chain"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        if self.levels == 0 {
            return cx.evaluate_child("leaf", Rc::clone(&self.leaf));
        }
        cx.evaluate_child(
            "next",
            Chain {
                levels: self.levels - 1,
                leaf: Rc::clone(&self.leaf),
            },
        )
    }
}

#[test]
fn unchanged_recomputation_does_not_propagate_upward() {
    let observer = RecordingObserver::new();
    let mut rt = FibreRuntime::new(Chain {
        levels: 2,
        leaf: Rc::new(FnDescriptor::new("leaf", 1, return_props)),
    });
    rt.on_event(observer.clone());
    rt.run_tick().unwrap();
    observer.take();

    let leaf = rt
        .fibre_at(&[
            Key::from("next"),
            Key::from("next"),
            Key::from("leaf"),
        ])
        .expect("leaf is live");
    rt.invalidate(leaf, InvalidateReason::PropsChanged).unwrap();
    rt.run_tick().unwrap();

    // An unchanged recomputation propagates nothing.
    assert_eq!(
        observer.evaluated_paths(),
        vec![path(&["next", "next", "leaf"])],
    );
}

#[test]
fn external_invalidation_forces_one_reevaluation() {
    let observer = RecordingObserver::new();
    let mut rt = FibreRuntime::new(FnDescriptor::new("leaf", 3, return_props));
    rt.on_event(observer.clone());
    rt.run_tick().unwrap();
    observer.take();

    let root = rt.root();
    rt.invalidate(root, InvalidateReason::StateChanged).unwrap();
    rt.run_tick().unwrap();
    assert_eq!(observer.evaluated_paths(), vec![KeyPath::root()]);
}

fn short_normal(_props: &Value, _cx: &mut CallCx<'_>) -> Result<Value> {
    Ok(Value::from("short"))
}

fn short_analysis(_props: &Value, cx: &mut CallCx<'_>) -> Result<Value> {
    // Visualization completeness: evaluate the normally skipped child too.
    cx.evaluate_child("skipped", FnDescriptor::new("extra", 1, return_props))?;
    Ok(Value::from("short"))
}

#[test]
fn analysis_mode_evaluates_short_circuited_children() {
    let mut rt = FibreRuntime::new(
        FnDescriptor::new("short", (), short_normal).with_analysis(short_analysis),
    );
    rt.run_tick().unwrap();
    assert!(rt.export().find(&path(&["skipped"])).is_none());

    rt.set_analysis_mode(true);
    assert!(rt.needs_tick());
    rt.run_tick().unwrap();
    assert!(rt.export().find(&path(&["skipped"])).is_some());

    // Leaving analysis mode unmounts the analysis-only child again.
    rt.set_analysis_mode(false);
    rt.run_tick().unwrap();
    assert!(rt.export().find(&path(&["skipped"])).is_none());
}

/// Pair of independent stateful counters, for ordering tests.
#[derive(Debug, Clone)]
struct TwoCounters {
    cells: Rc<RefCell<Vec<Setter>>>,
}

impl PartialEq for TwoCounters {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cells, &other.cells)
    }
}

#[derive(Debug, Clone)]
struct Counter {
    cells: Rc<RefCell<Vec<Setter>>>,
}

impl PartialEq for Counter {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cells, &other.cells)
    }
}

impl Descriptor for Counter {
    fn type_name(&self) -> &'static str {
        "Counter"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        let (value, setter) = cx.use_state(0)?;
        self.cells.borrow_mut().push(setter);
        Ok(value)
    }
}

impl Descriptor for TwoCounters {
    fn type_name(&self) -> &'static str {
        "TwoCounters"
    }

    fn eq_descriptor(&self, other: &dyn Descriptor) -> bool {
        descriptor_eq(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn evaluate(&self, cx: &mut CallCx<'_>) -> Result<Value> {
        let a = cx.evaluate_child(
            "a",
            Counter {
                cells: Rc::clone(&self.cells),
            },
        )?;
        let b = cx.evaluate_child(
            "b",
            Counter {
                cells: Rc::clone(&self.cells),
            },
        )?;
        Ok(Value::from(vec![a, b]))
    }
}

#[test]
fn siblings_reevaluate_in_child_key_order() {
    let cells = Rc::new(RefCell::new(Vec::new()));
    let observer = RecordingObserver::new();
    let mut rt = FibreRuntime::new(TwoCounters {
        cells: Rc::clone(&cells),
    });
    rt.on_event(observer.clone());
    rt.run_tick().unwrap();
    observer.take();

    // Invalidate b first, then a: the tick still runs a before b.
    {
        let setters = cells.borrow();
        setters[1].set(20);
        setters[0].set(10);
    }
    let result = rt.run_tick().unwrap();
    assert_eq!(result, Value::from(vec![Value::from(10), Value::from(20)]));

    let evaluated = observer.evaluated_paths();
    let a_at = evaluated.iter().position(|p| *p == path(&["a"]));
    let b_at = evaluated.iter().position(|p| *p == path(&["b"]));
    assert!(a_at.expect("a ran") < b_at.expect("b ran"));
}

#[test]
fn dispose_tears_down_the_whole_tree() {
    let observer = RecordingObserver::new();
    let mut rt = FibreRuntime::new(Chain {
        levels: 1,
        leaf: Rc::new(FnDescriptor::new("leaf", 1, return_props)),
    });
    rt.on_event(observer.clone());
    rt.run_tick().unwrap();
    observer.take();

    rt.dispose();
    let events = observer.take();
    let unmounts: Vec<_> = events
        .iter()
        .filter(|event| event.kind == weft_core::FibreEventKind::Unmount)
        .map(|event| event.path.clone())
        .collect();
    // Children unmount before their parents.
    assert_eq!(
        unmounts,
        vec![
            path(&["next", "leaf"]),
            path(&["next"]),
            KeyPath::root(),
        ],
    );
}

#[test]
fn update_root_with_a_new_type_remounts() {
    let mut rt = FibreRuntime::new(FnDescriptor::new("leaf", 1, return_props));
    assert_eq!(rt.run_tick().unwrap(), Value::from(1));

    rt.update_root(SelfStart { target: 5 });
    assert_eq!(rt.run_tick().unwrap(), Value::from(0));
    assert_eq!(rt.run_tick().unwrap(), Value::from(5));
}
