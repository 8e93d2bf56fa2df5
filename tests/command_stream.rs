use fluid_canvas::command::{
    Access, Command, CommandStream, HazardError, PipelineStage, ResourceAccess,
};
use fluid_canvas::device::{BufferHandle, ImageHandle, MaterialHandle, PipelineHandle};
use fluid_canvas::stage::StagePushConstants;
use std::sync::Arc;

const A: ImageHandle = ImageHandle(0);
const B: ImageHandle = ImageHandle(1);
const BUF: BufferHandle = BufferHandle(0);

fn dispatch(stream: &mut CommandStream, access: &[ResourceAccess]) {
    stream.push(Command::BindPipeline(PipelineHandle(0)));
    stream.push(Command::BindMaterial {
        material: MaterialHandle(0),
        uniform_offset: 0,
        access: Arc::from(access),
    });
    stream.push(Command::PushConstants(StagePushConstants::default()));
    stream.push(Command::Dispatch { groups: [1, 1, 1] });
}

#[test]
fn test_well_formed_chain_validates() {
    let mut stream = CommandStream::new();
    stream.transition_read_only(A, PipelineStage::Compute);
    stream.transition_general(B, Access::WRITE);
    dispatch(&mut stream, &[ResourceAccess::Sample(A), ResourceAccess::Store(B)]);

    stream.transition_general(B, Access::READ);
    stream.transition_general(A, Access::WRITE);
    dispatch(&mut stream, &[ResourceAccess::Load(B), ResourceAccess::Store(A)]);

    assert_eq!(stream.validate(), Ok(()));
    assert_eq!(stream.dispatches_since(0), 2);
}

#[test]
fn test_read_after_write_without_transition() {
    let mut stream = CommandStream::new();
    stream.transition_general(A, Access::READ | Access::WRITE);
    stream.transition_general(B, Access::WRITE);
    dispatch(&mut stream, &[ResourceAccess::Store(A)]);
    dispatch(&mut stream, &[ResourceAccess::Load(A), ResourceAccess::Store(B)]);

    assert!(
        matches!(stream.validate(), Err(HazardError::ReadAfterWrite { image, .. }) if image == A),
        "second dispatch reads A before any barrier"
    );
}

#[test]
fn test_write_after_write_without_transition() {
    let mut stream = CommandStream::new();
    stream.transition_general(A, Access::WRITE);
    dispatch(&mut stream, &[ResourceAccess::Store(A)]);
    dispatch(&mut stream, &[ResourceAccess::Store(A)]);

    assert!(matches!(
        stream.validate(),
        Err(HazardError::WriteAfterWrite { .. })
    ));
}

#[test]
fn test_store_needs_general_layout() {
    let mut stream = CommandStream::new();
    stream.transition_read_only(A, PipelineStage::Compute);
    dispatch(&mut stream, &[ResourceAccess::Store(A)]);

    assert!(matches!(
        stream.validate(),
        Err(HazardError::Layout { needed: "store", .. })
    ));
}

#[test]
fn test_fragment_read_only_is_not_compute_readable() {
    let mut stream = CommandStream::new();
    stream.transition_read_only(A, PipelineStage::Fragment);
    stream.transition_general(B, Access::WRITE);
    dispatch(&mut stream, &[ResourceAccess::Sample(A), ResourceAccess::Store(B)]);

    assert!(matches!(
        stream.validate(),
        Err(HazardError::Layout { needed: "sampled", .. })
    ));
}

#[test]
fn test_untracked_image() {
    let mut stream = CommandStream::new();
    dispatch(&mut stream, &[ResourceAccess::Load(A)]);

    assert_eq!(
        stream.validate(),
        Err(HazardError::Untracked {
            command: 3,
            image: A
        })
    );
}

#[test]
fn test_read_write_alias_in_one_dispatch() {
    let mut stream = CommandStream::new();
    stream.transition_general(A, Access::READ | Access::WRITE);
    dispatch(&mut stream, &[ResourceAccess::Load(A), ResourceAccess::Store(A)]);

    assert!(matches!(
        stream.validate(),
        Err(HazardError::ReadWriteAlias { .. })
    ));
}

#[test]
fn test_buffer_reuse_needs_barrier() {
    let mut stream = CommandStream::new();
    dispatch(&mut stream, &[ResourceAccess::Buffer(BUF)]);
    dispatch(&mut stream, &[ResourceAccess::Buffer(BUF)]);
    assert!(matches!(
        stream.validate(),
        Err(HazardError::BufferReuse { .. })
    ));

    let mut stream = CommandStream::new();
    dispatch(&mut stream, &[ResourceAccess::Buffer(BUF)]);
    stream.buffer_barrier(BUF);
    dispatch(&mut stream, &[ResourceAccess::Buffer(BUF)]);
    assert_eq!(stream.validate(), Ok(()));
}

#[test]
fn test_dispatch_without_pipeline() {
    let mut stream = CommandStream::new();
    stream.push(Command::Dispatch { groups: [1, 1, 1] });
    assert_eq!(
        stream.validate(),
        Err(HazardError::Unbound {
            command: 0,
            missing: "pipeline"
        })
    );
}

#[test]
fn test_validate_from_ignores_earlier_commands() {
    let mut stream = CommandStream::new();
    dispatch(&mut stream, &[ResourceAccess::Load(A)]);
    let start = stream.len();

    stream.transition_general(B, Access::WRITE);
    dispatch(&mut stream, &[ResourceAccess::Store(B)]);

    assert!(stream.validate().is_err());
    assert_eq!(stream.validate_from(start), Ok(()));
    assert_eq!(stream.dispatches_since(start), 1);
}
