use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::{GenericKind, PrimitiveType, Ty, TypeId};
use crate::ClassId;

struct TypeTable {
    /// All interned types
    types: Vec<Ty>,
    /// Map from type to its ID for deduplication
    intern_map: FxHashMap<Ty, TypeId>,
}

impl TypeTable {
    fn register(&mut self, ty: Ty) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.intern_map.insert(ty.clone(), id);
        self.types.push(ty);
        id
    }
}

/// The type context interns types and hands out stable ids.
///
/// Methods compiled on different workers intern nullable and generic
/// instantiations concurrently, so the table sits behind a read-mostly lock.
pub struct TypeContext {
    inner: RwLock<TypeTable>,
}

impl TypeContext {
    /// Create a new type context with the predefined types registered.
    pub fn new() -> Self {
        let mut table = TypeTable {
            types: Vec::new(),
            intern_map: FxHashMap::default(),
        };

        // Order matches the TypeId constants
        table.register(Ty::Void);
        table.register(Ty::Object);
        table.register(Ty::String);
        table.register(Ty::Null);
        table.register(Ty::Error);
        for primitive in PrimitiveType::ALL {
            table.register(Ty::Primitive(primitive));
        }
        table.register(Ty::Generic {
            kind: GenericKind::Task,
            args: Vec::new(),
        });
        debug_assert_eq!(table.types.len() as u32, TypeId::FIRST_USER);

        Self {
            inner: RwLock::new(table),
        }
    }

    /// Intern a type, returning its unique ID.
    pub fn intern(&self, ty: Ty) -> TypeId {
        if let Some(&id) = self.inner.read().intern_map.get(&ty) {
            return id;
        }
        let mut table = self.inner.write();
        if let Some(&id) = table.intern_map.get(&ty) {
            return id;
        }
        table.register(ty)
    }

    /// Get the type for an ID.
    pub fn get(&self, id: TypeId) -> Ty {
        self.inner.read().types[id.0 as usize].clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every interned type in id order.
    pub fn snapshot(&self) -> Vec<Ty> {
        self.inner.read().types.clone()
    }

    pub fn class(&self, class: ClassId) -> TypeId {
        self.intern(Ty::Class(class))
    }

    pub fn nullable(&self, underlying: TypeId) -> TypeId {
        self.intern(Ty::Nullable(underlying))
    }

    pub fn generic(&self, kind: GenericKind, args: Vec<TypeId>) -> TypeId {
        self.intern(Ty::Generic { kind, args })
    }

    pub fn type_param(&self, index: u8) -> TypeId {
        self.intern(Ty::TypeParam(index))
    }

    pub fn primitive(&self, id: TypeId) -> Option<PrimitiveType> {
        self.get(id).as_primitive()
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        self.primitive(id).is_some_and(PrimitiveType::is_numeric)
    }

    pub fn nullable_underlying(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Ty::Nullable(inner) => Some(inner),
            _ => None,
        }
    }

    /// Generic arguments when `id` is an instantiation of `kind`.
    pub fn generic_args(&self, id: TypeId, kind: GenericKind) -> Option<Vec<TypeId>> {
        match self.get(id) {
            Ty::Generic { kind: k, args } if k == kind => Some(args),
            _ => None,
        }
    }

    /// Replace type parameters in `id` with `args`.
    pub fn substitute(&self, id: TypeId, args: &[TypeId]) -> TypeId {
        match self.get(id) {
            Ty::TypeParam(index) => args.get(index as usize).copied().unwrap_or(TypeId::ERROR),
            Ty::Nullable(inner) => {
                let inner = self.substitute(inner, args);
                self.nullable(inner)
            }
            Ty::Generic { kind, args: own } => {
                let own = own.iter().map(|&a| self.substitute(a, args)).collect();
                self.generic(kind, own)
            }
            _ => id,
        }
    }

    /// Whether `id` mentions a type parameter anywhere.
    pub fn contains_type_param(&self, id: TypeId) -> bool {
        match self.get(id) {
            Ty::TypeParam(_) => true,
            Ty::Nullable(inner) => self.contains_type_param(inner),
            Ty::Generic { args, .. } => args.iter().any(|&a| self.contains_type_param(a)),
            _ => false,
        }
    }
}

impl Default for TypeContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_ids() {
        let ctx = TypeContext::new();
        assert_eq!(ctx.get(TypeId::INT), Ty::Primitive(PrimitiveType::Int));
        assert_eq!(ctx.get(TypeId::DECIMAL), Ty::Primitive(PrimitiveType::Decimal));
        assert_eq!(PrimitiveType::ULong.type_id(), TypeId::ULONG);
        assert_eq!(ctx.generic(GenericKind::Task, Vec::new()), TypeId::TASK);
    }

    #[test]
    fn test_interning_is_stable() {
        let ctx = TypeContext::new();
        let a = ctx.nullable(TypeId::INT);
        let b = ctx.nullable(TypeId::INT);
        assert_eq!(a, b);
        assert_eq!(ctx.nullable_underlying(a), Some(TypeId::INT));
        assert_ne!(a, ctx.nullable(TypeId::LONG));
    }

    #[test]
    fn test_substitute() {
        let ctx = TypeContext::new();
        let t0 = ctx.type_param(0);
        let enumerator = ctx.generic(GenericKind::IEnumerator, vec![t0]);
        assert!(ctx.contains_type_param(enumerator));
        let concrete = ctx.substitute(enumerator, &[TypeId::STRING]);
        assert_eq!(
            ctx.generic_args(concrete, GenericKind::IEnumerator),
            Some(vec![TypeId::STRING])
        );
    }

    #[test]
    fn test_concurrent_intern() {
        let ctx = std::sync::Arc::new(TypeContext::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ctx = ctx.clone();
                std::thread::spawn(move || ctx.nullable(TypeId::DOUBLE))
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
