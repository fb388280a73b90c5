//! Integration tests for meshes and the shared-buffer arena.
//!
//! Tests are parameterized using `rstest` over storage modes and write hints.
//! Whatever the storage, every submesh must read back exactly what was written
//! to it, and its draw data must point at that data.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use rstest::rstest;

use common::{
    TestContext, Vertex, assert_arena_consistent, quad_indices, shared_record, vertices,
};
use meshpool_graphics::{
    AllocationRecord, BufferKind, DummyBackend, ErrorKind, Mesh, PrimitiveTopology,
    SetDataOptions, StorageMode,
};

/// Check every submesh against the expected contents and its draw data.
fn assert_mesh_matches(mesh: &Mesh, expected: &BTreeMap<&str, Vec<Vertex>>) {
    assert_eq!(mesh.submesh_count(), expected.len());
    for (name, data) in expected {
        assert_eq!(&mesh.read_vertices::<Vertex>(name).unwrap(), data, "{name}");

        let submesh = mesh.submesh(name).unwrap();
        let streams = submesh.vertex_streams();
        assert_eq!(streams.vertex_count() as usize, data.len(), "{name}");
        if data.is_empty() {
            assert!(streams.is_empty(), "{name}");
            continue;
        }

        let derived = streams.streams();
        let stream = &derived[0];
        let owner = match submesh.allocation(BufferKind::Vertex).record() {
            Some(record) => {
                assert_eq!(stream.vertex_offset as usize, record.offset, "{name}");
                mesh.shared_vertex_buffer().unwrap().clone()
            }
            None => {
                assert_eq!(stream.vertex_offset, 0, "{name}");
                submesh
                    .vertex_streams()
                    .binding(0)
                    .and_then(|b| b.buffer())
                    .unwrap()
            }
        };
        assert!(Arc::ptr_eq(&stream.buffer, owner.read().raw()), "{name}");
    }
    assert_arena_consistent(mesh, BufferKind::Vertex);
    assert_arena_consistent(mesh, BufferKind::Index);
}

// ============================================================================
// Arena properties
// ============================================================================

#[rstest]
fn test_removal_shifts_following_submesh(
    #[values(SetDataOptions::None, SetDataOptions::Discard, SetDataOptions::NoOverwrite)]
    options: SetDataOptions,
) {
    let ctx = TestContext::new();
    let mut mesh = ctx.mesh_with(StorageMode::Shared, options);
    mesh.add_submesh_default("a", &vertices(0, 10), &quad_indices(1)).unwrap();
    mesh.add_submesh_default("b", &vertices(10, 5), &quad_indices(2)).unwrap();
    assert_eq!(shared_record(&mesh, BufferKind::Index, "b"), AllocationRecord::new(6, 12));

    mesh.remove_submesh("a").unwrap();

    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "b"), AllocationRecord::new(0, 5));
    assert_eq!(shared_record(&mesh, BufferKind::Index, "b"), AllocationRecord::new(0, 12));
    assert_eq!(mesh.shared_vertex_buffer().unwrap().read().capacity(), 5);

    let range = mesh.submesh("b").unwrap().index_range();
    assert_eq!(range.start_index, 0);
    assert_eq!(range.index_count, 12);
    assert_eq!(range.primitive_count(PrimitiveTopology::TriangleList), 4);
    assert_eq!(mesh.read_indices::<u16>("b").unwrap(), quad_indices(2));
    assert_mesh_matches(&mesh, &BTreeMap::from([("b", vertices(10, 5))]));
}

#[rstest]
#[case::same_size(5, 5)]
#[case::smaller(5, 3)]
#[case::single_vertex(5, 1)]
fn test_freed_tail_is_reused(#[case] freed: usize, #[case] needed: usize) {
    let ctx = TestContext::new();
    let mut mesh = ctx.mesh(StorageMode::Shared);
    mesh.add_submesh_default("a", &vertices(0, 10), &[] as &[u16]).unwrap();
    mesh.add_submesh_default("b", &vertices(10, freed), &[] as &[u16]).unwrap();
    let created = ctx.backend.stats().buffers_created;

    mesh.remove_submesh("b").unwrap();
    mesh.add_submesh_default("c", &vertices(50, needed), &[] as &[u16]).unwrap();

    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "c"), AllocationRecord::new(10, needed));
    assert_eq!(mesh.shared_vertex_buffer().unwrap().read().capacity(), 10 + freed);
    // No reallocation happened
    assert_eq!(ctx.backend.stats().buffers_created, created);
    assert_mesh_matches(
        &mesh,
        &BTreeMap::from([("a", vertices(0, 10)), ("c", vertices(50, needed))]),
    );
}

#[test]
fn test_gap_left_by_shrink_is_filled_by_append() {
    let ctx = TestContext::new();
    let mut mesh = ctx.mesh(StorageMode::Shared);
    mesh.add_submesh_default("a", &vertices(0, 8), &[] as &[u16]).unwrap();
    mesh.add_submesh_default("b", &vertices(8, 8), &[] as &[u16]).unwrap();
    mesh.replace_vertices("a", &vertices(100, 3)).unwrap();

    let created = ctx.backend.stats().buffers_created;
    mesh.append_vertices("a", &vertices(200, 5)).unwrap();

    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "a"), AllocationRecord::new(0, 8));
    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "b"), AllocationRecord::new(8, 8));
    assert_eq!(ctx.backend.stats().buffers_created, created);

    let mut a = vertices(100, 3);
    a.extend(vertices(200, 5));
    assert_mesh_matches(&mesh, &BTreeMap::from([("a", a), ("b", vertices(8, 8))]));
}

#[test]
fn test_append_larger_than_gap_relocates() {
    let ctx = TestContext::new();
    let mut mesh = ctx.mesh(StorageMode::Shared);
    mesh.add_submesh_default("a", &vertices(0, 8), &[] as &[u16]).unwrap();
    mesh.add_submesh_default("b", &vertices(8, 8), &[] as &[u16]).unwrap();
    mesh.add_submesh_default("c", &vertices(16, 2), &[] as &[u16]).unwrap();
    mesh.replace_vertices("a", &vertices(100, 6)).unwrap();

    // Gap of 2 after a, 3 requested
    mesh.append_vertices("a", &vertices(200, 3)).unwrap();

    // Only a's old span is compacted away; the gap moves to the front
    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "b"), AllocationRecord::new(2, 8));
    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "c"), AllocationRecord::new(10, 2));
    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "a"), AllocationRecord::new(12, 9));
    assert_eq!(mesh.shared_vertex_buffer().unwrap().read().capacity(), 21);

    let mut a = vertices(100, 6);
    a.extend(vertices(200, 3));
    assert_mesh_matches(
        &mesh,
        &BTreeMap::from([("a", a), ("b", vertices(8, 8)), ("c", vertices(16, 2))]),
    );
}

// ============================================================================
// Edit sequences
// ============================================================================

#[rstest]
#[case::shared(StorageMode::Shared)]
#[case::private(StorageMode::Private)]
fn test_edit_sequence(#[case] storage: StorageMode) {
    let ctx = TestContext::new();
    let mut mesh = ctx.mesh(storage);
    let mut expected: BTreeMap<&str, Vec<Vertex>> = BTreeMap::new();

    for (i, name) in ["hull", "mast", "sail", "flag"].into_iter().enumerate() {
        let data = vertices(i * 100, 4 + i);
        mesh.add_submesh_default(name, &data, &quad_indices(1)).unwrap();
        expected.insert(name, data);
    }
    assert_mesh_matches(&mesh, &expected);

    mesh.append_vertices("mast", &vertices(1000, 3)).unwrap();
    expected.get_mut("mast").unwrap().extend(vertices(1000, 3));
    assert_mesh_matches(&mesh, &expected);

    mesh.remove_vertices("sail", 1, 2, false).unwrap();
    expected.get_mut("sail").unwrap().drain(1..3);
    assert_mesh_matches(&mesh, &expected);

    mesh.replace_vertices("hull", &vertices(2000, 2)).unwrap();
    expected.insert("hull", vertices(2000, 2));
    assert_mesh_matches(&mesh, &expected);

    mesh.remove_vertices("flag", 0, 2, true).unwrap();
    let flag = expected.get_mut("flag").unwrap();
    flag[0] = bytemuck::Zeroable::zeroed();
    flag[1] = bytemuck::Zeroable::zeroed();
    assert_mesh_matches(&mesh, &expected);

    mesh.remove_submesh("mast").unwrap();
    expected.remove("mast");
    assert_mesh_matches(&mesh, &expected);

    mesh.append_vertices("hull", &vertices(3000, 9)).unwrap();
    expected.get_mut("hull").unwrap().extend(vertices(3000, 9));
    assert_mesh_matches(&mesh, &expected);

    mesh.replace_vertices("sail", &[] as &[Vertex]).unwrap();
    expected.insert("sail", Vec::new());
    assert_mesh_matches(&mesh, &expected);

    mesh.compact().unwrap();
    assert_mesh_matches(&mesh, &expected);

    for name in ["hull", "flag"] {
        assert_eq!(mesh.read_indices::<u16>(name).unwrap(), quad_indices(1));
    }
}

#[test]
fn test_compact_packs_in_offset_order() {
    let ctx = TestContext::new();
    let mut mesh = ctx.mesh(StorageMode::Shared);
    mesh.add_submesh_default("a", &vertices(0, 6), &[] as &[u16]).unwrap();
    mesh.add_submesh_default("b", &vertices(6, 6), &[] as &[u16]).unwrap();
    mesh.add_submesh_default("c", &vertices(12, 6), &[] as &[u16]).unwrap();
    mesh.replace_vertices("a", &vertices(20, 2)).unwrap();
    mesh.replace_vertices("b", &vertices(30, 1)).unwrap();

    assert_eq!(mesh.compact().unwrap(), 9);
    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "a"), AllocationRecord::new(0, 2));
    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "b"), AllocationRecord::new(2, 1));
    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "c"), AllocationRecord::new(3, 6));
    assert_eq!(mesh.compact().unwrap(), 0);
    assert_mesh_matches(
        &mesh,
        &BTreeMap::from([
            ("a", vertices(20, 2)),
            ("b", vertices(30, 1)),
            ("c", vertices(12, 6)),
        ]),
    );
}

// ============================================================================
// Errors
// ============================================================================

#[rstest]
#[case::past_end(4, 1)]
#[case::too_long(0, 5)]
#[case::straddles_end(3, 2)]
fn test_remove_out_of_range(
    #[case] offset: usize,
    #[case] length: usize,
    #[values(StorageMode::Shared, StorageMode::Private)] storage: StorageMode,
) {
    let ctx = TestContext::new();
    let mut mesh = ctx.mesh(storage);
    mesh.add_submesh_default("a", &vertices(0, 4), &[] as &[u16]).unwrap();
    mesh.add_submesh_default("b", &vertices(4, 4), &[] as &[u16]).unwrap();

    let err = mesh.remove_vertices("a", offset, length, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_mesh_matches(
        &mesh,
        &BTreeMap::from([("a", vertices(0, 4)), ("b", vertices(4, 4))]),
    );
}

#[test]
fn test_unknown_submesh() {
    let ctx = TestContext::new();
    let mut mesh = ctx.mesh(StorageMode::Shared);

    let err = mesh.remove_submesh("ghost").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
    let err = mesh.read_vertices::<Vertex>("ghost").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
}

#[derive(Debug, Clone, Copy)]
enum Relocation {
    Append,
    Replace,
}

#[rstest]
#[case::append(Relocation::Append)]
#[case::replace(Relocation::Replace)]
fn test_failed_relocation_leaves_mesh_unchanged(#[case] edit: Relocation) {
    // Two creations build the shared vertex buffer, the move needs a third
    let ctx = TestContext::with_backend(DummyBackend::with_creation_limit(2));
    let mut mesh = ctx.mesh(StorageMode::Shared);
    mesh.add_submesh_default("a", &vertices(0, 4), &[] as &[u16]).unwrap();
    mesh.add_submesh_default("b", &vertices(4, 4), &[] as &[u16]).unwrap();

    let err = match edit {
        Relocation::Append => mesh.append_vertices("a", &vertices(50, 2)),
        Relocation::Replace => mesh.replace_vertices("a", &vertices(50, 6)),
    }
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);

    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "a"), AllocationRecord::new(0, 4));
    assert_eq!(shared_record(&mesh, BufferKind::Vertex, "b"), AllocationRecord::new(4, 4));
    assert_eq!(mesh.shared_vertex_buffer().unwrap().read().capacity(), 8);
    assert_arena_consistent(&mesh, BufferKind::Vertex);
    assert_mesh_matches(
        &mesh,
        &BTreeMap::from([("a", vertices(0, 4)), ("b", vertices(4, 4))]),
    );
    assert_eq!(ctx.backend.stats().buffers_created, 2);
}

#[test]
fn test_failed_private_replace_leaves_submesh_unchanged() {
    let ctx = TestContext::with_backend(DummyBackend::with_creation_limit(1));
    let mut mesh = ctx.mesh(StorageMode::Private);
    mesh.add_submesh_default("a", &vertices(0, 4), &[] as &[u16]).unwrap();

    let err = mesh.replace_vertices("a", &vertices(10, 2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);

    let submesh = mesh.submesh("a").unwrap();
    assert_eq!(submesh.vertex_count(), 4);
    assert_eq!(submesh.vertex_streams().vertex_count(), 4);
    assert_eq!(mesh.read_vertices::<Vertex>("a").unwrap(), vertices(0, 4));
}

// ============================================================================
// Disposal
// ============================================================================

#[rstest]
#[case::shared(StorageMode::Shared, 2)]
#[case::private(StorageMode::Private, 6)]
fn test_dispose_releases_everything(#[case] storage: StorageMode, #[case] buffers: usize) {
    let ctx = TestContext::new();
    let mut mesh = ctx.mesh(storage);
    for name in ["a", "b", "c"] {
        mesh.add_submesh_default(name, &vertices(0, 4), &quad_indices(1)).unwrap();
    }
    assert_eq!(ctx.factory.buffer_count(), buffers);

    let streams = mesh.submesh("a").unwrap().vertex_streams().streams();
    mesh.dispose();

    assert_eq!(ctx.factory.buffer_count(), 0);
    // Draw data handed out earlier keeps its hardware buffer alive on its own
    assert_eq!(streams.len(), 1);
}
