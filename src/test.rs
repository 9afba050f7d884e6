use crate::{
    allocate_shared, make_shared, try_allocate_shared, AllocError, Allocator, Global, InitError,
    Pool, Shared, Weak,
};
use std::{
    alloc::Layout,
    cell::{Cell, RefCell},
    fmt,
    mem::drop,
    panic::{self, AssertUnwindSafe},
    ptr::NonNull,
    rc::Rc,
};

#[derive(Debug, Clone, Default)]
struct Drops(Rc<Cell<usize>>);

impl Drops {
    fn count(&self) -> usize {
        self.0.get()
    }
}

#[derive(Debug)]
struct Tracked {
    value: i32,
    drops: Drops,
}

impl Tracked {
    fn new(value: i32, drops: &Drops) -> Self {
        Tracked {
            value,
            drops: drops.clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.0.set(self.drops.0.get() + 1);
    }
}

/// Forwards to `Global` and keeps track of the live allocations.
#[derive(Debug, Clone, Default)]
struct Counting {
    live: Rc<Cell<usize>>,
    total: Rc<Cell<usize>>,
}

impl Counting {
    fn live(&self) -> usize {
        self.live.get()
    }

    fn total(&self) -> usize {
        self.total.get()
    }
}

unsafe impl Allocator for Counting {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let ptr = Global.allocate(layout)?;
        self.live.set(self.live.get() + 1);
        self.total.set(self.total.get() + 1);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.set(self.live.get() - 1);
        unsafe { Global.deallocate(ptr, layout) }
    }
}

#[derive(Debug, Clone, Copy)]
struct Exhausted;

unsafe impl Allocator for Exhausted {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        Err(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        unreachable!()
    }
}

/// Forwards to `Global` and counts the objects built and torn down in its blocks.
#[derive(Debug, Clone, Default)]
struct Constructing {
    constructs: Rc<Cell<usize>>,
    destroys: Rc<Cell<usize>>,
}

unsafe impl Allocator for Constructing {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { Global.deallocate(ptr, layout) }
    }

    unsafe fn construct<T>(&self, ptr: NonNull<T>, value: T) {
        self.constructs.set(self.constructs.get() + 1);
        unsafe { ptr.as_ptr().write(value) }
    }

    unsafe fn destroy<T: ?Sized>(&self, ptr: NonNull<T>) {
        self.destroys.set(self.destroys.get() + 1);
        unsafe { std::ptr::drop_in_place(ptr.as_ptr()) }
    }
}

struct PanicOnDrop;

impl Drop for PanicOnDrop {
    fn drop(&mut self) {
        panic!("destructor failed");
    }
}

#[derive(Debug, PartialEq)]
struct Point {
    x: i32,
    y: i32,
    label: String,
}

impl Point {
    fn new(x: i32, y: i32, label: &str) -> Self {
        Point {
            x,
            y,
            label: label.to_owned(),
        }
    }
}

#[test]
fn t001() {
    let s = Shared::new(1);

    assert!(s.get() == Some(&1));
    assert!(*s == 1);
    assert!(s.use_count() == 1);
    assert!(s.weak_count() == 0);
    assert!(!s.is_empty());
}

#[test]
fn t002() {
    let drops = Drops::default();
    let s = Shared::new(Tracked::new(7, &drops));

    let mut copies: Vec<_> = (0..5).map(|_| s.clone()).collect();
    assert!(s.use_count() == 6);
    drop(s);

    // drop from the middle, the back and the front
    for (live, at) in [(5, 2), (4, 3), (3, 0), (2, 1)] {
        assert!(copies[0].use_count() == live);
        copies.remove(at);
        assert!(drops.count() == 0);
    }

    assert!(copies[0].use_count() == 1);
    assert!(copies[0].value == 7);
    drop(copies);
    assert!(drops.count() == 1);
}

#[test]
fn t003() {
    let alloc = Counting::default();
    let drops = Drops::default();

    let s = allocate_shared(alloc.clone(), || Tracked::new(3, &drops)).unwrap();
    let w1 = s.downgrade();
    let w2 = w1.clone();
    assert!(alloc.live() == 1);
    assert!(s.weak_count() == 2);

    drop(s);
    assert!(drops.count() == 1);
    assert!(alloc.live() == 1);

    drop(w1);
    assert!(alloc.live() == 1);

    drop(w2);
    assert!(alloc.live() == 0);
    assert!(alloc.total() == 1);
}

#[test]
fn t004() {
    let s1 = Shared::new(String::from("a"));
    let s2 = s1.clone();
    let w = Weak::from(&s1);

    assert!(!w.expired());
    drop(s1);
    assert!(!w.expired());
    drop(s2);
    assert!(w.expired());
}

#[test]
fn t005() {
    let s = Shared::new(5);
    let w = s.downgrade();

    let before = s.use_count();
    let locked = w.lock();
    assert!(locked.use_count() == before + 1);
    assert!(locked == s);
    assert!(*locked == 5);

    drop(locked);
    drop(s);

    let locked = w.lock();
    assert!(locked.is_empty());
    assert!(locked.use_count() == 0);
    assert!(w.upgrade().is_none());
}

#[test]
fn t006() {
    let mut s1 = Shared::new(9);
    let w1 = s1.downgrade();

    let s2 = s1.take();
    assert!(s1.is_empty());
    assert!(s1.use_count() == 0);
    assert!(s2.use_count() == 1);
    assert!(s2.weak_count() == 1);

    let mut w1 = w1;
    let w2 = w1.take();
    assert!(w1.expired());
    assert!(w1.use_count() == 0);
    assert!(w2.weak_count() == 1);
    assert!(w2.use_count() == 1);

    // a plain move changes nothing either
    let s3 = s2;
    assert!(s3.use_count() == 1);
    assert!(s3.weak_count() == 1);
}

#[test]
fn t007() {
    let s = make_shared(|| Point::new(1, 2, "p")).unwrap();

    assert!(*s == Point::new(1, 2, "p"));
    assert!(s.use_count() == 1);
}

#[test]
fn t008() {
    let drops = Drops::default();
    let original = make_shared(|| Tracked::new(42, &drops)).unwrap();

    let c1 = original.clone();
    let c2 = original.clone();
    let c3 = original.clone();

    drop(original);
    drop(c1);
    drop(c2);
    assert!(c3.use_count() == 1);
    assert!(c3.value == 42);
    assert!(drops.count() == 0);

    drop(c3);
    assert!(drops.count() == 1);
}

#[test]
fn t009() {
    let alloc = Counting::default();
    let deleted = Rc::new(Cell::new(0));

    let deleter = {
        let deleted = deleted.clone();
        move |ptr: NonNull<i32>| {
            deleted.set(deleted.get() + 1);
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        }
    };

    let raw = Box::into_raw(Box::new(11));
    let s = unsafe { Shared::from_raw_in(raw, deleter, alloc.clone()) }.unwrap();
    assert!(s.as_ptr() == NonNull::new(raw));
    assert!(alloc.live() == 1);

    let w = s.downgrade();
    let s2 = s.clone();
    drop(s);
    assert!(deleted.get() == 0);

    drop(s2);
    assert!(deleted.get() == 1);
    assert!(alloc.live() == 1);

    drop(w);
    assert!(deleted.get() == 1);
    assert!(alloc.live() == 0);
}

#[test]
fn t010() {
    let drops = Drops::default();
    let raw = Box::into_raw(Box::new(Tracked::new(1, &drops)));

    let err = unsafe { Shared::from_raw_in(raw, crate::DefaultDelete, Exhausted) }.unwrap_err();
    assert!(err.layout.size() > 0);
    assert!(drops.count() == 1);
}

#[test]
fn t011() {
    let alloc = Counting::default();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        allocate_shared(alloc.clone(), || -> Point { panic!("constructor failed") })
    }));

    assert!(result.is_err());
    assert!(alloc.total() == 1);
    assert!(alloc.live() == 0);
}

#[test]
fn t012() {
    let alloc = Counting::default();

    let result = try_allocate_shared(alloc.clone(), || Err::<Point, _>("bad point"));
    assert!(matches!(result, Err(InitError::Init("bad point"))));
    assert!(alloc.total() == 1);
    assert!(alloc.live() == 0);

    let s = try_allocate_shared(alloc.clone(), || Ok::<_, &str>(Point::new(0, 0, "o"))).unwrap();
    assert!(s.label == "o");
    assert!(alloc.live() == 1);
}

#[test]
fn t013() {
    let called = Cell::new(false);

    let result = allocate_shared(Exhausted, || called.set(true));
    assert!(result.is_err());
    assert!(!called.get());

    let result = try_allocate_shared(Exhausted, || Ok::<_, fmt::Error>(1));
    assert!(matches!(result, Err(InitError::Alloc(_))));
}

#[test]
fn t014() {
    let drops = Drops::default();
    let parent = Shared::new((Tracked::new(4, &drops), Point::new(3, 4, "q")));

    let point = parent.project(|(_, point)| point);
    let label = point.project(|point| point.label.as_str());
    assert!(parent.use_count() == 3);

    drop(parent);
    drop(point);
    assert!(drops.count() == 0);
    assert!(&*label == "q");
    assert!(label.use_count() == 1);

    drop(label);
    assert!(drops.count() == 1);
}

#[test]
fn t015() {
    let s = Shared::new(Point::new(5, 6, "r"));
    let x = s.clone().map(|point| &point.x);
    assert!(s.use_count() == 2);
    assert!(*x == 5);

    let aliased: Shared<i32> = unsafe { s.alias(NonNull::from(&s.x)) };
    assert!(aliased == x);
    assert!(aliased.ptr_eq(&x));
    assert!(s.use_count() == 3);

    let other = Shared::new(Point::new(5, 6, "r"));
    assert!(other != s);
    assert!(!other.ptr_eq(&s));
    assert!(Shared::<i32>::empty() == Shared::<i32>::default());
}

#[test]
fn t016() {
    let drops = Drops::default();
    let mut s1 = Shared::new(Tracked::new(1, &drops));
    let s2 = s1.clone();
    let w = s1.downgrade();

    s1.reset();
    assert!(s1.is_empty());
    assert!(s2.use_count() == 1);
    assert!(drops.count() == 0);

    let mut s2 = s2;
    s2.reset();
    assert!(drops.count() == 1);
    assert!(w.expired());

    s2.reset();
    assert!(drops.count() == 1);
}

#[test]
fn t017() {
    let drops = Drops::default();
    let a = Shared::new(Tracked::new(1, &drops));
    let b = Shared::new(Tracked::new(2, &drops));

    let mut c = a.clone();
    let same = c.clone();
    c.clone_from(&same);
    assert!(a.use_count() == 3);

    c.clone_from(&b);
    assert!(a.use_count() == 2);
    assert!(b.use_count() == 2);
    assert!(c.value == 2);

    drop(same);
    drop(a);
    assert!(drops.count() == 1);

    let mut w = Weak::new();
    w.clone_from(&b.downgrade());
    assert!(b.weak_count() == 1);
    assert!(w.lock().value == 2);
}

#[test]
fn t018() {
    struct Node {
        me: RefCell<Weak<Node>>,
        drops: Drops,
    }

    impl Drop for Node {
        fn drop(&mut self) {
            assert!(self.me.borrow().expired());
            self.drops.0.set(self.drops.0.get() + 1);
        }
    }

    let alloc = Counting::default();
    let drops = Drops::default();

    let node = allocate_shared(alloc.clone(), || Node {
        me: RefCell::new(Weak::new()),
        drops: drops.clone(),
    })
    .unwrap();
    *node.me.borrow_mut() = node.downgrade();
    assert!(node.weak_count() == 1);

    drop(node);
    assert!(drops.count() == 1);
    assert!(alloc.live() == 0);
}

#[test]
fn t019() {
    fn as_debug(s: &String) -> &(dyn fmt::Debug + 'static) {
        s
    }

    let double: Box<dyn Fn(i32) -> i32> = Box::new(|x: i32| x * 2);
    let f = Shared::from(double);
    assert!(f(4) == 8);

    let s = Shared::new(String::from("debug"));
    let d = s.project(as_debug);
    assert!(format!("{d:?}") == "\"debug\"");
    assert!(d == s);
}

#[test]
fn t020() {
    static POOL: Pool = Pool::new();

    let s = allocate_shared(&POOL, || String::from("first")).unwrap();
    let w = s.downgrade();
    drop(s);
    assert!(POOL.cached() == 0);

    drop(w);
    assert!(POOL.cached() == 1);

    let s1 = allocate_shared(&POOL, || String::from("second")).unwrap();
    assert!(POOL.cached() == 0);
    let s2 = allocate_shared(&POOL, || String::from("third")).unwrap();
    assert!(*s1 == "second");
    assert!(*s2 == "third");

    drop(s1);
    drop(s2);
    assert!(POOL.cached() == 2);
}

#[test]
fn t021() {
    static POOL: Pool = Pool::bounded(1);

    let handles: Vec<_> = (0..3)
        .map(|i| allocate_shared(&POOL, move || i).unwrap())
        .collect();
    drop(handles);
    assert!(POOL.cached() == 1);

    // blocks of another layout bypass the pool
    let other = allocate_shared(&POOL, || [0u64; 4]).unwrap();
    drop(other);
    assert!(POOL.cached() == 1);
}

#[test]
fn t022() {
    let w: Weak<i32> = Weak::new();

    assert!(w.expired());
    assert!(w.use_count() == 0);
    assert!(w.weak_count() == 0);
    assert!(w.lock().is_empty());
    assert!(w.upgrade().is_none());
    assert!(Shared::<i32>::empty().downgrade().expired());
}

#[test]
fn t023() {
    let s = Shared::new(1);
    let w1 = s.downgrade();
    let w2 = w1.clone();
    let w3 = Weak::from(&s);

    assert!(s.weak_count() == 3);
    assert!(w1 == w2);
    assert!(w2.weak_count() == 3);

    drop(w3);
    drop(w1);
    assert!(s.weak_count() == 1);
}

#[test]
fn t024() {
    let s = Shared::new(5);
    assert!(format!("{s:?}") == "5");
    assert!(format!("{s}") == "5");
    assert!(format!("{:?}", Shared::<i32>::empty()) == "Shared(<empty>)");
}

#[test]
#[should_panic(expected = "empty `Shared`")]
fn t025() {
    let s: Shared<i32> = Shared::empty();
    let _value: i32 = *s;
}

#[test]
fn t026() {
    let drops = Drops::default();
    let raw = Box::into_raw(Box::new(Tracked::new(8, &drops)));
    let s = unsafe { Shared::from_raw(raw) };
    let w = s.downgrade();

    assert!(s.value == 8);
    drop(s);
    assert!(drops.count() == 1);
    assert!(w.expired());

    let s = unsafe { Shared::<i32>::from_raw(std::ptr::null_mut()) };
    assert!(s.is_empty());
}

#[test]
fn t027() {
    for layout in [
        Layout::new::<()>(),
        Layout::from_size_align(0, 16).unwrap(),
    ] {
        let ptr = Global.allocate(layout).unwrap();
        assert!(ptr.as_ptr() as usize % layout.align() == 0);
        unsafe { Global.deallocate(ptr, layout) };
    }

    let s = Shared::new(());
    let w = s.downgrade();
    drop(s);
    assert!(w.expired());
}

#[test]
fn t028() {
    let alloc = Counting::default();

    let s = allocate_shared(alloc.clone(), || PanicOnDrop).unwrap();
    let w = s.downgrade();

    let result = panic::catch_unwind(AssertUnwindSafe(|| drop(s)));
    assert!(result.is_err());
    assert!(w.expired());
    assert!(w.weak_count() == 1);
    assert!(alloc.live() == 1);

    drop(w);
    assert!(alloc.live() == 0);
}

#[test]
fn t029() {
    let alloc = Constructing::default();
    let drops = Drops::default();

    let s = allocate_shared(alloc.clone(), || Tracked::new(4, &drops)).unwrap();
    assert!(alloc.constructs.get() == 1);
    assert!(alloc.destroys.get() == 0);
    assert!(s.value == 4);

    drop(s);
    assert!(alloc.constructs.get() == 1);
    assert!(alloc.destroys.get() == 1);
    assert!(drops.count() == 1);
}

#[test]
fn t030() {
    use std::collections::HashSet;

    let a = Shared::new(1);
    let b = Shared::new(1);

    let mut seen = HashSet::new();
    assert!(seen.insert(a.downgrade()));
    assert!(!seen.insert(a.downgrade()));
    assert!(seen.insert(b.downgrade()));
    assert!(seen.insert(Weak::<i32>::new()));
    assert!(!seen.insert(Weak::new()));
    assert!(seen.len() == 3);

    assert!(seen.contains(&a.downgrade()));
}
