use std::{fmt, hash::Hash, marker::PhantomData, ops::Index};

pub(crate) trait Key:
    Copy + Clone + fmt::Debug + Eq + PartialEq + Hash + Sized + 'static
{
    fn to_usize(self) -> usize;
    fn from_usize(id: usize) -> Self;
}

/// A `Vec`-backed arena of owned values with typed keys.
///
/// Keys are never reused; entries live as long as the arena. This is what
/// lets the model keep delete history and override chains as plain ids.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Arena<K, V> {
    items: Vec<V>,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V> Arena<K, V> {
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl<K, V> Arena<K, V>
where
    K: Key,
{
    pub fn insert(&mut self, item: V) -> K {
        self.insert_with_key(|_| item)
    }

    pub fn insert_with_key<F>(&mut self, f: F) -> K
    where
        F: FnOnce(K) -> V,
    {
        let id = self.items.len();
        let item = f(K::from_usize(id));
        self.items.push(item);
        K::from_usize(id)
    }

    pub fn get(&self, id: K) -> Option<&V> {
        self.items.get(id.to_usize())
    }

    pub fn get_mut(&mut self, id: K) -> Option<&mut V> {
        self.items.get_mut(id.to_usize())
    }
}

impl<K, V> Index<K> for Arena<K, V>
where
    K: Key,
{
    type Output = V;

    fn index(&self, id: K) -> &Self::Output {
        &self.items[id.to_usize()]
    }
}

impl<K, V> Default for Arena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! new_key_type {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(
            Copy,
            Clone,
            Default,
            Debug,
            Eq,
            PartialEq,
            Ord,
            PartialOrd,
            std::hash::Hash,
        )]
        $vis struct $name(pub u32);

        impl $crate::arena::Key for $name {
            #[inline]
            fn to_usize(self) -> usize {
                self.0 as usize
            }

            #[inline]
            fn from_usize(id: usize) -> Self {
                Self(u32::try_from(id).expect("arena key overflow"))
            }
        }
    };
}
pub(crate) use new_key_type;
