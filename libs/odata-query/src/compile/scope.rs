use odata_edm::Value;

/// Evaluation scope: the current range variable plus its enclosing lambdas.
///
/// Slot 0 is `$it`; each `any`/`all` body pushes one slot.
#[derive(Clone, Copy, Debug)]
pub struct Scope<'a> {
    value: &'a Value,
    parent: Option<&'a Scope<'a>>,
    slot: usize,
    params: &'a [Value],
}

impl<'a> Scope<'a> {
    #[must_use]
    pub const fn root(value: &'a Value, params: &'a [Value]) -> Self {
        Self {
            value,
            parent: None,
            slot: 0,
            params,
        }
    }

    #[must_use]
    pub fn child<'b>(&'b self, value: &'b Value) -> Scope<'b> {
        Scope {
            value,
            parent: Some(self),
            slot: self.slot + 1,
            params: self.params,
        }
    }

    #[must_use]
    pub const fn value(&self) -> &'a Value {
        self.value
    }

    #[must_use]
    pub const fn params(&self) -> &'a [Value] {
        self.params
    }

    /// Value bound to `slot`; `None` when the slot is not in scope.
    #[must_use]
    pub fn slot(&self, slot: usize) -> Option<&Value> {
        let mut current = Some(self);
        while let Some(s) = current {
            if s.slot == slot {
                return Some(s.value);
            }
            current = s.parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_enclosing_slots() {
        let it = Value::Int(1);
        let inner = Value::Int(2);
        let root = Scope::root(&it, &[]);
        let child = root.child(&inner);
        assert_eq!(child.slot(0), Some(&Value::Int(1)));
        assert_eq!(child.slot(1), Some(&Value::Int(2)));
        assert_eq!(child.slot(2), None);
    }
}
