use fluid_canvas::{GlobalHeap, ResourceIndex, ResourceRegistry};

#[test]
fn test_register_returns_dense_indices() {
    let mut registry = ResourceRegistry::new();
    let a = registry.register("a");
    let b = registry.register("b");
    let c = registry.register("c");

    assert_eq!((a.get(), b.get(), c.get()), (0, 1, 2));
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.get(b), Some(&"b"));
}

#[test]
fn test_unregister_recycles_index() {
    let mut registry = ResourceRegistry::new();
    let a = registry.register(10);
    let b = registry.register(20);

    assert_eq!(registry.unregister(a), Some(10));
    assert_eq!(registry.get(a), None, "freed index must not resolve");
    assert_eq!(registry.len(), 1);

    let c = registry.register(30);
    assert_eq!(c, a, "freed slot should be reused before growing");
    assert_eq!(registry.capacity(), 2);
    assert_eq!(registry.get(b), Some(&20));
    assert_eq!(registry.get(c), Some(&30));
}

#[test]
fn test_double_unregister_is_noop() {
    let mut registry = ResourceRegistry::new();
    let a = registry.register(1u32);
    registry.unregister(a);
    assert_eq!(registry.unregister(a), None);

    // A second free of the same slot must not hand it out twice.
    let x = registry.register(2);
    let y = registry.register(3);
    assert_ne!(x, y);
}

#[test]
fn test_out_of_range_lookup() {
    let registry: ResourceRegistry<u32> = ResourceRegistry::new();
    assert!(registry.is_empty());
    assert_eq!(registry.get(ResourceIndex(42)), None);
}

#[test]
fn test_iter_skips_free_slots() {
    let mut registry = ResourceRegistry::new();
    let a = registry.register('a');
    registry.register('b');
    registry.unregister(a);

    let live: Vec<_> = registry.iter().map(|(_, v)| *v).collect();
    assert_eq!(live, vec!['b']);
}

#[test]
fn test_heap_tables_are_independent() {
    let mut heap = GlobalHeap::new();
    let image = heap.images.register(fluid_canvas::device::ImageHandle(7));
    let texture = heap.textures.register(fluid_canvas::device::ImageHandle(7));

    assert_eq!(image.get(), 0);
    assert_eq!(texture.get(), 0);
    assert_eq!(heap.texture(texture), Some(fluid_canvas::device::ImageHandle(7)));
    assert_eq!(heap.buffer(ResourceIndex(0)), None);
}
