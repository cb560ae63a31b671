//! End-to-end scenarios (spec.md §8), driving a real [`Dispatcher`] and
//! [`Link`] over socket pairs standing in for the proxy's channels and
//! wait/irq fds.

use std::io::Write;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::os::unix::net::UnixStream;

use remote_link::{waitfd, ChannelKind, Link, OwnedFrame, Verdict};
use remote_wire::frame::{BarAccess, IrqFdInfo, PciConfigAccess};
use remote_wire::{Command, Frame, Payload};

use remote::device::FactoryRegistry;
use remote::devices::PciTestDevFactory;
use remote::dispatcher::Dispatcher;
use remote::sysmem::NoopSysmem;

fn new_link() -> (Link, UnixStream, UnixStream) {
    let (com_remote, com_proxy) = UnixStream::pair().unwrap();
    let (mmio_remote, mmio_proxy) = UnixStream::pair().unwrap();
    let link = Link::new(com_remote.into_raw_fd(), mmio_remote.into_raw_fd()).unwrap();
    (link, com_proxy, mmio_proxy)
}

fn new_dispatcher() -> Dispatcher {
    let mut factories = FactoryRegistry::new();
    factories.register(Box::new(PciTestDevFactory));
    Dispatcher::new(factories, Box::new(NoopSysmem))
}

fn owned(frame: Frame) -> OwnedFrame {
    unsafe { OwnedFrame::new(frame) }
}

/// Drives a `SET_IRQFD` through the dispatcher so `id` is marked created;
/// most handlers short-circuit otherwise (spec.md §4.4).
fn mark_created(dispatcher: &mut Dispatcher, link: &Link, id: u64) {
    let (irqfd, _irq_peer) = UnixStream::pair().unwrap();
    let (resamplefd, _resample_peer) = UnixStream::pair().unwrap();
    let frame = Frame::new(
        Command::SetIrqfd,
        id,
        Payload::Irq(IrqFdInfo { vector: 0 }),
        vec![irqfd.into_raw_fd(), resamplefd.into_raw_fd()],
    )
    .unwrap();
    assert_eq!(dispatcher.process(link, ChannelKind::Com, owned(frame)), Verdict::Keep);
}

/// Reads one wire frame off `stream` without any `Link`/`Channel` machinery,
/// standing in for what the proxy side would do.
fn read_reply(stream: &UnixStream) -> Frame {
    use remote_wire::frame::{Header, HEADER_LEN};
    use sendfd::RecvWithFd;

    let mut header_buf = [0u8; HEADER_LEN];
    let mut fd_buf = [0 as RawFd; remote_wire::MAX_FDS];
    let (n, num_fds) = stream.recv_with_fd(&mut header_buf, &mut fd_buf).unwrap();
    assert_eq!(n, HEADER_LEN);
    let header = Header::from_bytes(&header_buf).unwrap();
    let mut body = vec![0u8; header.size as usize];
    if !body.is_empty() {
        std::io::Read::read_exact(&mut &*stream, &mut body).unwrap();
    }
    Frame::parse(header, &body, fd_buf[..num_fds].to_vec()).unwrap()
}

fn dev_opts_json(driver: &str, name: &str) -> Vec<u8> {
    serde_json::json!({ "driver": driver, "id": name }).to_string().into_bytes()
}

#[test]
fn add_configure_remove() {
    let (link, _com_proxy, _mmio_proxy) = new_link();
    let mut dispatcher = new_dispatcher();

    let (w_tx, w_rx) = UnixStream::pair().unwrap();
    let frame = Frame::new(Command::DevOpts, 7, Payload::Bytestream(dev_opts_json("pci-testdev", "d0")), vec![
        w_tx.into_raw_fd(),
    ])
    .unwrap();
    assert_eq!(dispatcher.process(&link, ChannelKind::Com, owned(frame)), Verdict::Keep);
    assert_eq!(waitfd::wait(w_rx.as_raw_fd()), 0); // REMOTE_OK
    assert!(dispatcher.registry().get(7).is_some());

    mark_created(&mut dispatcher, &link, 7);
    assert!(dispatcher.registry().get(7).unwrap().created);
    assert!(dispatcher.registry().machine_creation_done());

    let (w2_tx, w2_rx) = UnixStream::pair().unwrap();
    let del_json = serde_json::json!({ "id": "d0" }).to_string().into_bytes();
    let frame = Frame::new(Command::DeviceDel, 0, Payload::Bytestream(del_json), vec![w2_tx.into_raw_fd()]).unwrap();
    assert_eq!(dispatcher.process(&link, ChannelKind::Com, owned(frame)), Verdict::Keep);
    assert_eq!(waitfd::wait(w2_rx.as_raw_fd()), 1);
    assert!(dispatcher.registry().get(7).is_none());
}

#[test]
fn config_read_returns_vendor_and_device_id() {
    let (link, _com_proxy, _mmio_proxy) = new_link();
    let mut dispatcher = new_dispatcher();

    let (w_tx, w_rx) = UnixStream::pair().unwrap();
    let frame = Frame::new(Command::DevOpts, 3, Payload::Bytestream(dev_opts_json("pci-testdev", "d3")), vec![
        w_tx.into_raw_fd(),
    ])
    .unwrap();
    dispatcher.process(&link, ChannelKind::Com, owned(frame));
    waitfd::wait(w_rx.as_raw_fd());
    mark_created(&mut dispatcher, &link, 3);

    let (w2_tx, w2_rx) = UnixStream::pair().unwrap();
    let access = PciConfigAccess { addr: 0, val: 0, len: 4 };
    let frame = Frame::new(Command::PciConfigRead, 3, Payload::Bytestream(access.to_bytes().to_vec()), vec![
        w2_tx.into_raw_fd(),
    ])
    .unwrap();
    assert_eq!(dispatcher.process(&link, ChannelKind::Com, owned(frame)), Verdict::Keep);

    let expected = 0x1b36u64 | (0x0005u64 << 16);
    assert_eq!(waitfd::wait(w2_rx.as_raw_fd()), expected);
}

/// Before `SET_IRQFD` has ever landed for a device, `PCI_CONFIG_READ`
/// short-circuits with `REMOTE_FAIL` rather than touching device state
/// (spec.md §4.4).
#[test]
fn config_read_before_set_irqfd_short_circuits() {
    let (link, _com_proxy, _mmio_proxy) = new_link();
    let mut dispatcher = new_dispatcher();

    let (w_tx, w_rx) = UnixStream::pair().unwrap();
    let frame = Frame::new(Command::DevOpts, 3, Payload::Bytestream(dev_opts_json("pci-testdev", "d3")), vec![
        w_tx.into_raw_fd(),
    ])
    .unwrap();
    dispatcher.process(&link, ChannelKind::Com, owned(frame));
    waitfd::wait(w_rx.as_raw_fd());
    assert!(!dispatcher.registry().get(3).unwrap().created);

    let (w2_tx, w2_rx) = UnixStream::pair().unwrap();
    let access = PciConfigAccess { addr: 0, val: 0, len: 4 };
    let frame = Frame::new(Command::PciConfigRead, 3, Payload::Bytestream(access.to_bytes().to_vec()), vec![
        w2_tx.into_raw_fd(),
    ])
    .unwrap();
    assert_eq!(dispatcher.process(&link, ChannelKind::Com, owned(frame)), Verdict::Keep);
    assert_eq!(waitfd::wait(w2_rx.as_raw_fd()), u64::MAX);
}

#[test]
fn bar_read_one_byte_replies_on_mmio_channel() {
    let (link, _com_proxy, mmio_proxy) = new_link();
    let mut dispatcher = new_dispatcher();

    let (w_tx, w_rx) = UnixStream::pair().unwrap();
    let frame = Frame::new(Command::DevOpts, 0, Payload::Bytestream(dev_opts_json("pci-testdev", "d0")), vec![
        w_tx.into_raw_fd(),
    ])
    .unwrap();
    dispatcher.process(&link, ChannelKind::Com, owned(frame));
    waitfd::wait(w_rx.as_raw_fd());
    mark_created(&mut dispatcher, &link, 0);

    let write_frame = Frame::new(
        Command::BarWrite,
        0,
        Payload::Bar(BarAccess { memory: true, addr: 0x10, val: 0xab, size: 1 }),
        vec![],
    )
    .unwrap();
    dispatcher.process(&link, ChannelKind::Com, owned(write_frame));

    let read_frame = Frame::new(
        Command::BarRead,
        0,
        Payload::Bar(BarAccess { memory: true, addr: 0x10, val: 0, size: 1 }),
        vec![],
    )
    .unwrap();
    assert_eq!(dispatcher.process(&link, ChannelKind::Com, owned(read_frame)), Verdict::Keep);

    let reply = read_reply(&mmio_proxy);
    assert_eq!(reply.cmd, Command::MmioReturn);
    let Payload::MmioReturn(ret) = reply.payload else { panic!("expected MmioReturn") };
    assert_eq!(ret.val, 0xab);
}

#[test]
fn ping_returns_process_id() {
    let (link, _com_proxy, _mmio_proxy) = new_link();
    let mut dispatcher = new_dispatcher();

    let (w_tx, w_rx) = UnixStream::pair().unwrap();
    let frame = Frame::new(Command::RemotePing, 0, Payload::None, vec![w_tx.into_raw_fd()]).unwrap();
    assert_eq!(dispatcher.process(&link, ChannelKind::Com, owned(frame)), Verdict::Keep);
    assert_eq!(waitfd::wait(w_rx.as_raw_fd()), std::process::id() as u64);
}

#[test]
fn unknown_command_tears_down_the_link() {
    let (com_remote, mut com_proxy) = UnixStream::pair().unwrap();
    let (mmio_remote, _mmio_proxy) = UnixStream::pair().unwrap();
    let mut link = Link::new(com_remote.into_raw_fd(), mmio_remote.into_raw_fd()).unwrap();

    let handle = std::thread::spawn(move || link.run(|_link, _kind, _frame| Verdict::Keep));

    let mut header = [0u8; 40];
    header[0..4].copy_from_slice(&0xdead_u32.to_ne_bytes());
    com_proxy.write_all(&header).unwrap();

    let result = handle.join().unwrap();
    assert!(result.is_err(), "an unknown command must be a fatal protocol error, tearing the link down");
}

#[test]
fn oversize_fd_count_tears_down_the_link() {
    let (com_remote, mut com_proxy) = UnixStream::pair().unwrap();
    let (mmio_remote, _mmio_proxy) = UnixStream::pair().unwrap();
    let mut link = Link::new(com_remote.into_raw_fd(), mmio_remote.into_raw_fd()).unwrap();

    let handle = std::thread::spawn(move || link.run(|_link, _kind, _frame| Verdict::Keep));

    let mut header = [0u8; 40];
    header[0..4].copy_from_slice(&(Command::RemotePing as u32).to_ne_bytes());
    header[32] = (remote_wire::MAX_FDS + 1) as u8;
    com_proxy.write_all(&header).unwrap();

    let result = handle.join().unwrap();
    assert!(result.is_err(), "oversize fd count must be a fatal protocol error");
}
