//! Functions and actions declared on the model.

use std::sync::Arc;

use crate::types::{qualify, TypeRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Function,
    Action,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: Arc<str>,
    pub type_ref: TypeRef,
}

/// A function or action. For bound operations the first parameter is the
/// binding parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub namespace: Arc<str>,
    pub name: Arc<str>,
    pub full_name: Arc<str>,
    pub kind: OperationKind,
    pub is_bound: bool,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeRef>,
}

impl Operation {
    fn new(namespace: &str, name: &str, kind: OperationKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            full_name: qualify(namespace, name).into(),
            kind,
            is_bound: false,
            parameters: Vec::new(),
            return_type: None,
        }
    }

    #[must_use]
    pub fn function(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, OperationKind::Function)
    }

    #[must_use]
    pub fn action(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, OperationKind::Action)
    }

    /// Mark the operation bound to `binding`, inserted as the first parameter.
    #[must_use]
    pub fn bound_to(mut self, binding: TypeRef) -> Self {
        self.is_bound = true;
        self.parameters.insert(
            0,
            Parameter {
                name: "bindingParameter".into(),
                type_ref: binding,
            },
        );
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<Arc<str>>, type_ref: TypeRef) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            type_ref,
        });
        self
    }

    #[must_use]
    pub fn returns(mut self, type_ref: TypeRef) -> Self {
        self.return_type = Some(type_ref);
        self
    }

    #[must_use]
    pub fn binding_type(&self) -> Option<&TypeRef> {
        if self.is_bound {
            self.parameters.first().map(|p| &p.type_ref)
        } else {
            None
        }
    }

    /// Parameters a caller supplies explicitly (the binding parameter excluded).
    #[must_use]
    pub fn explicit_parameters(&self) -> &[Parameter] {
        if self.is_bound {
            &self.parameters[1..]
        } else {
            &self.parameters
        }
    }

    #[must_use]
    pub const fn is_function(&self) -> bool {
        matches!(self.kind, OperationKind::Function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_function_splits_parameters() {
        let op = Operation::function("Ns", "IsExpensive")
            .bound_to(TypeRef::entity("Ns.Product"))
            .with_parameter("threshold", TypeRef::int32())
            .returns(TypeRef::boolean());

        assert_eq!(&*op.full_name, "Ns.IsExpensive");
        assert!(op.binding_type().is_some_and(TypeRef::is_entity));
        assert_eq!(op.explicit_parameters().len(), 1);
        assert_eq!(&*op.explicit_parameters()[0].name, "threshold");
    }
}
