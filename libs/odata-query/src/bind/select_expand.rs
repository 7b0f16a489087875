//! `$select` / `$expand` binding into a [`Projection`] tree.

use std::sync::Arc;

use odata_edm::{AnnotationTerm, Property};

use super::bound::{BoundOrderBy, Expansion, Projection, SelectedProperty};
use super::expr::ExprBinder;
use super::functions::FunctionRegistry;
use super::schema::Schema;
use crate::error::BindError;
use crate::syntax::ast::{ExpandItem, ExpandPath, Levels, NestedOptions, SelectItem, SortDir};

/// `$levels=max` resolves to this when no expansion depth limit is configured.
pub const DEFAULT_MAX_LEVELS: usize = 8;

pub(crate) struct ProjectionBinder<'a> {
    pub schema: &'a Schema,
    pub functions: &'a FunctionRegistry,
    pub max_expansion_depth: Option<usize>,
}

/// Key properties of `type_name` as an ascending ordering.
pub(crate) fn key_ordering(
    schema: &Schema,
    functions: &FunctionRegistry,
    type_name: &str,
) -> Result<Vec<BoundOrderBy>, BindError> {
    let Some(t) = schema.structured(type_name) else {
        return Ok(Vec::new());
    };
    let binder = ExprBinder::new(schema, functions, t.type_ref());
    schema
        .keys(type_name)
        .iter()
        .map(|k| {
            let it = binder.segment_of_it(&k.name)?;
            Ok(BoundOrderBy {
                expr: it,
                direction: SortDir::Asc,
            })
        })
        .collect()
}

fn not_found(schema: &Schema, type_name: &str, name: &str) -> BindError {
    let suggestion = schema
        .all_properties(type_name)
        .iter()
        .map(|p| (strsim::jaro_winkler(&p.name, name), p.name.to_string()))
        .filter(|(score, _)| *score >= 0.8)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, n)| n);
    BindError::PropertyNotFound {
        property: name.to_owned(),
        type_name: type_name.to_owned(),
        suggestion,
    }
}

impl ProjectionBinder<'_> {
    /// Bind the projection of one level. `depth` is the number of
    /// expansions above this level.
    pub fn bind(
        &self,
        type_name: &Arc<str>,
        select: Option<&[SelectItem]>,
        expand: &[ExpandItem],
        depth: usize,
    ) -> Result<Projection, BindError> {
        let mut projection = Projection::all(type_name.clone());
        if let Some(items) = select
            && !items.iter().any(|i| matches!(i, SelectItem::Wildcard))
        {
            projection.all = false;
            for item in items {
                if let SelectItem::Path(segments) = item {
                    self.select_path(&mut projection, type_name, segments, None)?;
                }
            }
            self.add_auto_selected(&mut projection, type_name);
            self.order_properties(&mut projection, type_name);
        }

        for item in expand {
            match &item.path {
                ExpandPath::All => {
                    for nav in self.schema.all_properties(type_name) {
                        if !nav.is_navigation()
                            || nav.has(AnnotationTerm::NotExpandable)
                            || projection.expansions.iter().any(|e| e.name == nav.name)
                        {
                            continue;
                        }
                        let path = nav.name.to_string();
                        let e = self.expansion(nav, None, path, &item.options, depth, false)?;
                        projection.expansions.push(e);
                    }
                }
                ExpandPath::Path(segments) => {
                    let e = self.expand_path(type_name, segments, &item.options, depth)?;
                    if let Some(existing) = projection
                        .expansions
                        .iter_mut()
                        .find(|x| x.name == e.name && x.type_cast == e.type_cast)
                    {
                        *existing = e;
                    } else {
                        projection.expansions.push(e);
                    }
                }
            }
        }
        self.add_auto_expanded(&mut projection, type_name, depth)?;
        Ok(projection)
    }

    fn select_path(
        &self,
        projection: &mut Projection,
        type_name: &str,
        segments: &[String],
        type_cast: Option<Arc<str>>,
    ) -> Result<(), BindError> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(());
        };
        if first.contains('.') {
            let target = self
                .schema
                .structured(first)
                .ok_or_else(|| BindError::TypeNotFound(first.clone()))?;
            if !self.schema.is_assignable_to(&target.full_name, type_name) {
                return Err(BindError::InvalidCast {
                    from: type_name.to_owned(),
                    to: target.full_name.to_string(),
                });
            }
            return self.select_path(projection, &target.full_name, rest, Some(target.full_name.clone()));
        }

        let property = match self.schema.find_property(type_name, first) {
            Some(p) => Some(p),
            None if self.schema.is_open(type_name) => None,
            None => return Err(not_found(self.schema, type_name, first)),
        };
        if property.as_ref().is_some_and(Property::is_navigation) {
            // Navigation links are rendered only through $expand.
            return Ok(());
        }
        let name: Arc<str> = Arc::from(first.as_str());
        let existing = projection
            .properties
            .iter()
            .position(|p| p.name == name && p.type_cast == type_cast);
        let idx = if let Some(i) = existing {
            projection.properties[i].auto = false;
            i
        } else {
            projection.properties.push(SelectedProperty {
                name: name.clone(),
                property: property.clone(),
                type_cast,
                nested: None,
                auto: false,
            });
            projection.properties.len() - 1
        };
        if rest.is_empty() {
            // Selecting the whole complex value drops any earlier sub-selection.
            projection.properties[idx].nested = None;
            return Ok(());
        }
        if existing.is_some() && projection.properties[idx].nested.is_none() {
            return Ok(());
        }

        let Some(complex) = property
            .as_ref()
            .and_then(|p| p.type_ref.element().structured_name().cloned())
        else {
            return Err(BindError::PropertyNotFound {
                property: rest[0].clone(),
                type_name: property
                    .map_or_else(|| "dynamic".to_owned(), |p| p.type_ref.to_string()),
                suggestion: None,
            });
        };
        let nested = projection.properties[idx]
            .nested
            .get_or_insert_with(|| {
                Box::new(Projection {
                    type_name: complex.clone(),
                    all: false,
                    properties: Vec::new(),
                    expansions: Vec::new(),
                })
            });
        self.select_path(nested, &complex, rest, None)
    }

    fn add_auto_selected(&self, projection: &mut Projection, type_name: &str) {
        let keys = self.schema.keys(type_name);
        for p in self.schema.all_properties(type_name) {
            let wanted = keys.iter().any(|k| k.name == p.name) || p.has(AnnotationTerm::AutoSelect);
            if !wanted || p.is_navigation() {
                continue;
            }
            if projection.properties.iter().any(|s| s.name == p.name) {
                continue;
            }
            projection.properties.push(SelectedProperty {
                name: p.name.clone(),
                property: Some(p),
                type_cast: None,
                nested: None,
                auto: true,
            });
        }
    }

    /// Declared order; dynamic properties last.
    fn order_properties(&self, projection: &mut Projection, type_name: &str) {
        let declared = self.schema.all_properties(type_name);
        let rank = |s: &SelectedProperty| {
            if s.type_cast.is_some() {
                return usize::MAX - 1;
            }
            declared
                .iter()
                .position(|p| p.name == s.name)
                .unwrap_or(usize::MAX)
        };
        projection.properties.sort_by_key(rank);
    }

    fn expand_path(
        &self,
        type_name: &str,
        segments: &[String],
        options: &NestedOptions,
        depth: usize,
    ) -> Result<Expansion, BindError> {
        let (type_cast, owner, name) = match segments {
            [name] => (None, type_name.to_owned(), name),
            [cast, name] if cast.contains('.') => {
                let target = self
                    .schema
                    .structured(cast)
                    .ok_or_else(|| BindError::TypeNotFound(cast.clone()))?;
                if !self.schema.is_assignable_to(&target.full_name, type_name) {
                    return Err(BindError::InvalidCast {
                        from: type_name.to_owned(),
                        to: target.full_name.to_string(),
                    });
                }
                (Some(target.full_name.clone()), target.full_name.to_string(), name)
            }
            _ => {
                return Err(BindError::Unsupported(format!(
                    "expand path `{}`",
                    segments.join("/")
                )));
            }
        };
        let property = self
            .schema
            .find_property(&owner, name)
            .ok_or_else(|| not_found(self.schema, &owner, name))?;
        if !property.is_navigation() {
            return Err(BindError::NotNavigation(name.clone()));
        }
        self.expansion(property, type_cast, segments.join("/"), options, depth, false)
    }

    fn expansion(
        &self,
        property: Property,
        type_cast: Option<Arc<str>>,
        path: String,
        options: &NestedOptions,
        depth: usize,
        auto: bool,
    ) -> Result<Expansion, BindError> {
        let target_type = property
            .type_ref
            .element()
            .structured_name()
            .cloned()
            .ok_or_else(|| BindError::NotNavigation(property.name.to_string()))?;
        let target = self
            .schema
            .structured(&target_type)
            .ok_or_else(|| BindError::TypeNotFound(target_type.to_string()))?;
        let collection = property.type_ref.is_collection();
        if !collection
            && (!options.orderby.is_empty()
                || options.top.is_some()
                || options.skip.is_some()
                || options.count.is_some())
        {
            return Err(BindError::Unsupported(format!(
                "collection options on single-valued navigation `{}`",
                property.name
            )));
        }

        let mut binder = ExprBinder::new(self.schema, self.functions, target.type_ref());
        let filter = match &options.filter {
            Some(e) => Some(binder.bind_predicate(e, &format!("$filter on `{path}`"))?),
            None => None,
        };
        let mut orderby = Vec::with_capacity(options.orderby.len());
        for item in &options.orderby {
            orderby.push(BoundOrderBy {
                expr: binder.bind_single_value(&item.expr, &format!("$orderby on `{path}`"))?,
                direction: item.direction,
            });
        }
        let stable_keys = key_ordering(self.schema, self.functions, &target_type)?;

        let levels = options.levels.map(|l| match l {
            Levels::Count(n) => n,
            Levels::Max => self
                .max_expansion_depth
                .unwrap_or(DEFAULT_MAX_LEVELS)
                .saturating_sub(depth)
                .max(1),
        });
        let mut nested_expand = options.expand.clone();
        if let Some(n) = levels.filter(|n| *n > 1)
            && self.schema.find_property(&target_type, &property.name).is_some()
        {
            let mut again = options.clone();
            again.levels = Some(Levels::Count(n - 1));
            nested_expand.retain(|e| !matches!(&e.path, ExpandPath::Path(p) if p.len() == 1 && *p[0] == *property.name));
            nested_expand.push(ExpandItem {
                path: ExpandPath::Path(vec![property.name.to_string()]),
                options: again,
            });
        }
        let projection = if auto {
            Projection::all(target_type.clone())
        } else {
            self.bind(&target_type, options.select.as_deref(), &nested_expand, depth + 1)?
        };

        Ok(Expansion {
            name: property.name.clone(),
            page_size: property.annotations.count(AnnotationTerm::PageSize),
            property,
            path,
            type_cast,
            target_type,
            filter,
            orderby,
            stable_keys,
            top: options.top,
            skip: options.skip,
            count: options.count.unwrap_or(false),
            levels: options.levels,
            projection,
            auto,
        })
    }

    fn add_auto_expanded(
        &self,
        projection: &mut Projection,
        type_name: &str,
        depth: usize,
    ) -> Result<(), BindError> {
        for nav in self.schema.all_properties(type_name) {
            if !nav.is_navigation()
                || !nav.has(AnnotationTerm::AutoExpand)
                || nav.has(AnnotationTerm::NotExpandable)
                || projection.expansions.iter().any(|e| e.name == nav.name)
            {
                continue;
            }
            let path = nav.name.to_string();
            let e = self.expansion(nav, None, path, &NestedOptions::default(), depth, true)?;
            projection.expansions.push(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse_expand, parse_select};
    use odata_edm::{EdmModel, EdmModelBuilder, PrimitiveKind, StructuredType, TypeRef};

    fn model() -> Arc<EdmModel> {
        let id = || TypeRef::primitive(PrimitiveKind::Int32).required();
        EdmModelBuilder::new("Default")
            .add_structured_type(
                StructuredType::entity("Ns", "Customer")
                    .with_property(Property::structural("Id", id()))
                    .with_property(Property::structural("Name", TypeRef::string()))
                    .with_property(Property::structural("Email", TypeRef::string()))
                    .with_property(Property::navigation(
                        "Orders",
                        TypeRef::collection(TypeRef::entity("Ns.Order")),
                    ))
                    .with_property(
                        Property::navigation("Manager", TypeRef::entity("Ns.Customer"))
                            .annotate(AnnotationTerm::NotExpandable),
                    )
                    .with_property(Property::navigation("Referrer", TypeRef::entity("Ns.Customer")))
                    .with_key("Id"),
            )
            .add_structured_type(
                StructuredType::entity("Ns", "Order")
                    .with_property(Property::structural("Id", id()))
                    .with_property(Property::structural("Total", TypeRef::primitive(PrimitiveKind::Decimal)))
                    .with_property(
                        Property::navigation("Customer", TypeRef::entity("Ns.Customer"))
                            .annotate(AnnotationTerm::AutoExpand),
                    )
                    .with_key("Id"),
            )
            .add_entity_set("Customers", "Ns.Customer")
            .build()
            .unwrap()
    }

    fn bind(select: Option<&str>, expand: &str) -> Result<Projection, BindError> {
        let schema = Schema::new(model());
        let functions = FunctionRegistry::new();
        let binder = ProjectionBinder {
            schema: &schema,
            functions: &functions,
            max_expansion_depth: Some(3),
        };
        let select = select.map(|s| parse_select("$select", s, 0).unwrap());
        let expand = if expand.is_empty() {
            Vec::new()
        } else {
            parse_expand("$expand", expand, 0).unwrap()
        };
        binder.bind(&Arc::from("Ns.Customer"), select.as_deref(), &expand, 0)
    }

    #[test]
    fn narrowed_select_adds_keys() {
        let p = bind(Some("Name"), "").unwrap();
        assert!(!p.all);
        let names: Vec<_> = p.properties.iter().map(|s| (s.name.to_string(), s.auto)).collect();
        assert_eq!(names, vec![("Id".to_owned(), true), ("Name".to_owned(), false)]);
    }

    #[test]
    fn wildcard_selects_everything() {
        let p = bind(Some("Name,*"), "").unwrap();
        assert!(p.all);
    }

    #[test]
    fn unknown_property_suggests() {
        let err = bind(Some("Nmae"), "").unwrap_err();
        assert!(matches!(
            err,
            BindError::PropertyNotFound { suggestion: Some(s), .. } if s == "Name"
        ));
    }

    #[test]
    fn expand_binds_nested_options_and_auto_expands() {
        let p = bind(None, "Orders($filter=Total gt 10;$top=2)").unwrap();
        let orders = &p.expansions[0];
        assert_eq!(orders.name.as_ref(), "Orders");
        assert!(orders.filter.is_some());
        assert_eq!(orders.top, Some(2));
        assert_eq!(orders.stable_keys.len(), 1);
        let customer = &orders.projection.expansions[0];
        assert!(customer.auto);
        assert_eq!(p.expansion_depth(), 1);
    }

    #[test]
    fn expand_star_skips_not_expandable() {
        let p = bind(None, "*").unwrap();
        let names: Vec<_> = p.expansions.iter().map(|e| e.name.to_string()).collect();
        assert_eq!(names, vec!["Orders".to_owned(), "Referrer".to_owned()]);
    }

    #[test]
    fn structural_property_cannot_be_expanded() {
        assert!(matches!(bind(None, "Name"), Err(BindError::NotNavigation(n)) if n == "Name"));
    }

    #[test]
    fn levels_unroll_recursive_navigation() {
        let p = bind(None, "Referrer($levels=2)").unwrap();
        let first = &p.expansions[0];
        assert_eq!(first.name.as_ref(), "Referrer");
        let again = &first.projection.expansions[0];
        assert_eq!(again.name.as_ref(), "Referrer");
        assert!(again.projection.expansions.is_empty());
        assert_eq!(p.expansion_depth(), 2);

        let max = bind(None, "Referrer($levels=max)").unwrap();
        assert_eq!(max.expansion_depth(), 3);
    }

    #[test]
    fn complex_sub_selection_after_whole_is_ignored() {
        let p = bind(Some("Name,Name"), "").unwrap();
        assert_eq!(p.properties.iter().filter(|s| s.name.as_ref() == "Name").count(), 1);
    }
}
