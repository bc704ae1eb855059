//! Human-readable value rendering with cycle detection.
//!
//! Tables may reference themselves (directly, or through a closure's
//! capture table), so this walks an explicit work stack rather than
//! recursing, remembering which table ids have already been opened for
//! printing and emitting a back-reference instead of looping forever.

use rustc_hash::FxHashSet;

use crate::instance::Instance;
use crate::value::Value;

enum Frame {
    Value(Value),
    TableClose,
    Comma,
}

impl Instance {
    pub fn get_value_print_string(&self, v: Value) -> String {
        let mut out = String::new();
        let mut seen: FxHashSet<crate::ids::TableId> = FxHashSet::default();
        let mut stack = vec![Frame::Value(v)];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Comma => out.push_str(", "),
                Frame::TableClose => out.push('}'),
                Frame::Value(v) => self.push_value_frames(v, &mut seen, &mut out, &mut stack),
            }
        }
        out
    }

    fn push_value_frames(
        &self,
        v: Value,
        seen: &mut FxHashSet<crate::ids::TableId>,
        out: &mut String,
        stack: &mut Vec<Frame>,
    ) {
        match v {
            Value::Nil => out.push_str("nil"),
            Value::Boolean(b) => out.push_str(if b { "true" } else { "false" }),
            Value::Number(n) => out.push_str(&format_number(n)),
            Value::String(sid) => {
                out.push('"');
                out.push_str(self.get_string(sid));
                out.push('"');
            }
            Value::Closure { .. } | Value::ForeignFunction(_) => out.push_str("<function>"),
            Value::ForeignObject(oid) => {
                let repr = self
                    .foreign_objects
                    .get(oid)
                    .and_then(|o| o.as_ref())
                    .map(|o| o.to_string_repr())
                    .unwrap_or_else(|| "<freed foreign object>".to_string());
                out.push_str(&repr);
            }
            Value::ForeignObjectMethod { .. } => out.push_str("<bound method>"),
            Value::InternalStrHash(h) => out.push_str(&format!("<hash {:#x}>", h)),
            Value::InternalTableGetIterator(_) => out.push_str("<iterator>"),
            Value::Table { id, .. } => {
                if !seen.insert(id) {
                    out.push_str(&format!("<table #{} (cycle)>", id.0));
                    return;
                }
                let Some(table) = self.tables.get(id).and_then(|t| t.as_ref()) else {
                    out.push_str("<freed table>");
                    return;
                };
                out.push('{');
                stack.push(Frame::TableClose);
                for i in (0..table.count).rev() {
                    if i != 0 {
                        stack.push(Frame::Value(self.heap[table.block.start + i]));
                        stack.push(Frame::Comma);
                    } else {
                        stack.push(Frame::Value(self.heap[table.block.start]));
                    }
                }
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TableFlags;

    #[test]
    fn prints_primitives() {
        let inst = Instance::new();
        assert_eq!(inst.get_value_print_string(Value::Nil), "nil");
        assert_eq!(inst.get_value_print_string(Value::Boolean(true)), "true");
        assert_eq!(inst.get_value_print_string(Value::Number(3.0)), "3");
        assert_eq!(inst.get_value_print_string(Value::Number(3.5)), "3.5");
    }

    #[test]
    fn prints_cyclic_table_with_backreference() {
        let mut inst = Instance::new();
        let id = inst.allocate_table(1).unwrap();
        let self_ref = Value::Table { id, flags: TableFlags::NONE };
        inst.table_append(id, self_ref).unwrap();
        let s = inst.get_value_print_string(self_ref);
        assert!(s.contains("cycle"));
    }
}
