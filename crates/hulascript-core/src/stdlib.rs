//! A small standard-library surface installed into an [`Instance`] at the
//! host's discretion (not automatically, unlike the original's constructor).
//! `irange` is the only member so far -- it's the function the spec's own
//! for-as-expression scenario exercises.

use hulascript_util::hash::dj2b_str;

use crate::foreign::ForeignObject;
use crate::instance::Instance;
use crate::value::Value;

/// Installs every standard-library global into `instance`. Idempotent only
/// in the sense that calling it twice just re-declares the same names; it
/// does not guard against a host that already bound `irange` itself.
pub fn install(instance: &mut Instance) {
    let f = instance.make_foreign_function(Box::new(get_int_range));
    instance.declare_global("irange", f);
}

fn get_int_range(args: &[Value], instance: &mut Instance) -> hulascript_util::error::RunResult<Value> {
    let arg_num = |v: &Value| -> hulascript_util::error::RunResult<i64> {
        match v {
            Value::Number(n) => Ok(*n as i64),
            _ => Err(instance.runtime_error("irange expects numeric arguments")),
        }
    };

    let (start, stop, step) = match args.len() {
        1 => (0, arg_num(&args[0])?, 1),
        2 => (arg_num(&args[0])?, arg_num(&args[1])?, 1),
        3 => (arg_num(&args[0])?, arg_num(&args[1])?, arg_num(&args[2])?),
        _ => return Err(instance.panic("irange expects 1, 2, or 3 arguments")),
    };

    let range = stop - start;
    if range != 0 {
        if step == 0 || range % step != 0 {
            return Err(instance.panic("irange expects (stop - start) % step to be zero"));
        }
        if range * step < 1 {
            return Err(instance.panic("irange expects (stop - start) * step to be >= 1 if (stop - start) != 0"));
        }
    }

    Ok(instance.add_foreign_object(Box::new(IntRange { start, stop, step })))
}

struct IntRange {
    start: i64,
    stop: i64,
    step: i64,
}

const METHOD_ITERATOR: u32 = 0;

impl ForeignObject for IntRange {
    fn load_property(&self, _name_hash: u64) -> Option<Value> {
        None
    }

    fn method_id_for(&self, name_hash: u64) -> Option<u32> {
        (name_hash == dj2b_str("iterator")).then_some(METHOD_ITERATOR)
    }

    fn call_method(
        &mut self,
        method_id: u32,
        _args: &[Value],
        instance: &mut Instance,
    ) -> hulascript_util::error::RunResult<Value> {
        match method_id {
            METHOD_ITERATOR => Ok(instance.add_foreign_object(Box::new(IntRangeIterator {
                current: self.start,
                stop: self.stop,
                step: self.step,
            }))),
            _ => Err(instance.runtime_error("unknown irange method")),
        }
    }

    fn to_string_repr(&self) -> String {
        format!("<irange {}..{} step {}>", self.start, self.stop, self.step)
    }
}

struct IntRangeIterator {
    current: i64,
    stop: i64,
    step: i64,
}

const METHOD_HAS_NEXT: u32 = 0;
const METHOD_NEXT: u32 = 1;

impl ForeignObject for IntRangeIterator {
    fn load_property(&self, _name_hash: u64) -> Option<Value> {
        None
    }

    fn method_id_for(&self, name_hash: u64) -> Option<u32> {
        if name_hash == dj2b_str("hasNext") {
            Some(METHOD_HAS_NEXT)
        } else if name_hash == dj2b_str("next") {
            Some(METHOD_NEXT)
        } else {
            None
        }
    }

    fn call_method(
        &mut self,
        method_id: u32,
        _args: &[Value],
        instance: &mut Instance,
    ) -> hulascript_util::error::RunResult<Value> {
        match method_id {
            METHOD_HAS_NEXT => Ok(Value::Boolean(self.current != self.stop)),
            METHOD_NEXT => {
                let v = Value::Number(self.current as f64);
                self.current += self.step;
                Ok(v)
            }
            _ => Err(instance.runtime_error("unknown irange iterator method")),
        }
    }

    fn to_string_repr(&self) -> String {
        "<irange iterator>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irange_drives_a_for_loop_to_completion() {
        let mut instance = Instance::new();
        install(&mut instance);
        let outcome = instance
            .run("for x in irange(1,5) do x*x end", None, false, false)
            .unwrap();
        let id = match outcome {
            crate::instance::RunOutcome::Value(Value::Table { id, .. }) => id,
            other => panic!("expected an array result, got {other:?}"),
        };
        let helper = instance.table_helper(id);
        assert_eq!(helper.size(), 4);
        let squares: Vec<f64> = (0..4).map(|i| helper.at_index(i).unwrap().as_number().unwrap()).collect();
        assert_eq!(squares, vec![1.0, 4.0, 9.0, 16.0]);
    }

    #[test]
    fn irange_rejects_non_divisible_step() {
        let mut instance = Instance::new();
        install(&mut instance);
        let outcome = instance.run("irange(1, 10, 3)", None, false, false).unwrap();
        assert!(matches!(outcome, crate::instance::RunOutcome::Empty));
        assert!(instance.last_runtime_error.is_some());
    }
}
