use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use embedded_io::{Read, Write};
use embedded_io_adapters::std::FromStd;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::comm::{Command, MAX_FRAME, PTP_MOVJ_XYZ, Response};
use crate::{ArmError, Pose};

pub const BAUD_RATE: u32 = 115_200;
pub const DEFAULT_SPEED: f32 = 100.0;
pub const DEFAULT_ACCELERATION: f32 = 100.0;
const INIT_JOINT_SPEED: f32 = 200.0;
const INIT_COORDINATE_SPEED: f32 = 200.0;
const INIT_JUMP_HEIGHT: f32 = 10.0;
const INIT_JUMP_LIMIT: f32 = 200.0;
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    /// Return once the controller reports the motion complete.
    Blocking,
    /// Return as soon as the controller accepted the target.
    Queued,
}

/// Operations every arm backend offers. Implementations serialize their own
/// I/O, so a shared `Arc<dyn Arm>` may be used from several threads.
pub trait Arm: Send + Sync {
    fn pose(&self) -> Result<Pose, ArmError>;
    fn move_to(&self, target: Pose, mode: MoveMode) -> Result<(), ArmError>;
    fn set_speed(&self, velocity: f32, acceleration: f32) -> Result<(), ArmError>;
    /// Halts execution of the controller's motion queue.
    fn stop(&self) -> Result<(), ArmError>;
    fn close(&self) -> Result<(), ArmError>;
}

struct Link<P> {
    /// `None` once the connection is closed.
    port: Option<P>,
    buffer: [u8; MAX_FRAME],
    verbose: bool,
}

impl<P: Read + Write> Link<P> {
    fn request<T>(
        &mut self,
        command: Command,
        decode: impl FnOnce(&Response) -> Result<T, ArmError>,
    ) -> Result<T, ArmError> {
        let port = self.port.as_mut().ok_or(ArmError::Closed)?;
        let response = command.send_command(port, &mut self.buffer, self.verbose)?;
        decode(&response)
    }

    fn execute(&mut self, command: Command) -> Result<(), ArmError> {
        self.request(command, |_| Ok(()))
    }

    fn current_index(&mut self) -> Result<u64, ArmError> {
        self.request(Command::GetQueuedCmdCurrentIndex, |response| {
            response.queued_index()
        })
    }
}

/// Connection to a Dobot controller over any `embedded_io` port.
pub struct Dobot<P> {
    link: Mutex<Link<P>>,
    halted: AtomicBool,
    closed: AtomicBool,
    poll_interval: Duration,
}

/// A [`Dobot`] on a host serial port.
pub type SerialDobot = Dobot<FromStd<Box<dyn SerialPort>>>;

impl SerialDobot {
    /// Opens `port_name`, runs the controller start-up sequence and reads the
    /// pose once to confirm the link.
    pub fn open(port_name: &str, verbose: bool) -> Result<Self, ArmError> {
        let port = create_arm_port(port_name)?;
        let dobot = Dobot::new(FromStd::new(port), verbose);
        let pose = dobot.initialise()?;
        info!("Connected to {port_name}, pose {}", pose.status_line());
        Ok(dobot)
    }
}

impl<P: Read + Write> Dobot<P> {
    pub fn new(port: P, verbose: bool) -> Self {
        Dobot {
            link: Mutex::new(Link {
                port: Some(port),
                buffer: [0u8; MAX_FRAME],
                verbose,
            }),
            halted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            poll_interval: QUEUE_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start queue execution from a clean queue and load the default motion
    /// parameters.
    pub fn initialise(&self) -> Result<Pose, ArmError> {
        self.ensure_open()?;
        {
            let mut link = self.link.lock();
            link.execute(Command::SetQueuedCmdStartExec)?;
            link.execute(Command::SetQueuedCmdClear)?;
            link.execute(Command::SetPtpJointParams {
                velocity: INIT_JOINT_SPEED,
                acceleration: INIT_JOINT_SPEED,
            })?;
            link.execute(Command::SetPtpCoordinateParams {
                velocity: INIT_COORDINATE_SPEED,
                acceleration: INIT_COORDINATE_SPEED,
            })?;
            link.execute(Command::SetPtpJumpParams {
                jump: INIT_JUMP_HEIGHT,
                limit: INIT_JUMP_LIMIT,
            })?;
            link.execute(Command::SetPtpCommonParams {
                velocity: DEFAULT_SPEED,
                acceleration: DEFAULT_ACCELERATION,
            })?;
            link.request(Command::GetPose, |response| response.pose())
        }
    }

    fn ensure_open(&self) -> Result<(), ArmError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ArmError::Closed)
        } else {
            Ok(())
        }
    }

    fn wait_for(&self, index: u64) -> Result<(), ArmError> {
        loop {
            if self.halted.load(Ordering::SeqCst) {
                return Err(ArmError::Halted);
            }
            let current = self.link.lock().current_index()?;
            debug!("Waiting for queued command {index}, controller at {current}");
            if current >= index {
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl<P: Read + Write + Send> Arm for Dobot<P> {
    fn pose(&self) -> Result<Pose, ArmError> {
        self.ensure_open()?;
        self.link
            .lock()
            .request(Command::GetPose, |response| response.pose())
    }

    fn move_to(&self, target: Pose, mode: MoveMode) -> Result<(), ArmError> {
        self.ensure_open()?;
        let index = {
            let mut link = self.link.lock();
            if self.halted.swap(false, Ordering::SeqCst) {
                warn!("Restarting halted command queue");
                link.execute(Command::SetQueuedCmdClear)?;
                link.execute(Command::SetQueuedCmdStartExec)?;
            }
            link.request(
                Command::SetPtpCmd {
                    mode: PTP_MOVJ_XYZ,
                    target,
                },
                |response| response.queued_index(),
            )?
        };
        info!(
            "Queued move to {} as command {index} ({mode:?})",
            target.status_line()
        );
        match mode {
            MoveMode::Blocking => self.wait_for(index),
            MoveMode::Queued => Ok(()),
        }
    }

    fn set_speed(&self, velocity: f32, acceleration: f32) -> Result<(), ArmError> {
        self.ensure_open()?;
        let mut link = self.link.lock();
        link.execute(Command::SetPtpCommonParams {
            velocity,
            acceleration,
        })?;
        link.execute(Command::SetPtpCoordinateParams {
            velocity,
            acceleration,
        })?;
        info!("Speed set to {velocity}, acceleration {acceleration}");
        Ok(())
    }

    fn stop(&self) -> Result<(), ArmError> {
        self.ensure_open()?;
        // flag and stop frame change together under the link, so a move
        // restarting the queue is either fully before or fully after
        let mut link = self.link.lock();
        link.execute(Command::SetQueuedCmdStopExec)?;
        self.halted.store(true, Ordering::SeqCst);
        drop(link);
        warn!("Command queue execution stopped");
        Ok(())
    }

    fn close(&self) -> Result<(), ArmError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ArmError::Closed);
        }
        drop(self.link.lock().port.take());
        info!("Connection closed, port released");
        Ok(())
    }
}

fn create_arm_port(port_name: &str) -> Result<Box<dyn SerialPort>, serialport::Error> {
    let port = serialport::new(port_name, BAUD_RATE)
        .timeout(Duration::from_millis(1000))
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .flow_control(FlowControl::None)
        .open()?;

    info!("Port opened successfully: {}", port_name);
    Ok(port)
}

/// Owns the shared arm handle for one command run and closes it exactly
/// once, either through [`Session::close`] or when dropped.
pub struct Session {
    arm: Arc<dyn Arm>,
    closed: bool,
}

impl Session {
    pub fn new(arm: Arc<dyn Arm>) -> Self {
        Session { arm, closed: false }
    }

    /// A handle for background loops. They must be finished before the
    /// session is closed.
    pub fn share(&self) -> Arc<dyn Arm> {
        Arc::clone(&self.arm)
    }

    pub fn close(mut self) -> Result<(), ArmError> {
        self.closed = true;
        self.arm.close()
    }
}

impl Deref for Session {
    type Target = dyn Arm;

    fn deref(&self) -> &Self::Target {
        &*self.arm
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.arm.close() {
                warn!("Closing connection failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::mock::ScriptedPort;
    use crate::comm::{
        GET_POSE_ID, GET_QUEUED_CMD_CURRENT_INDEX_ID, SET_PTP_CMD_ID,
        SET_PTP_COMMON_PARAMS_ID, SET_PTP_COORDINATE_PARAMS_ID, SET_PTP_JOINT_PARAMS_ID,
        SET_PTP_JUMP_PARAMS_ID, SET_QUEUED_CMD_CLEAR_ID, SET_QUEUED_CMD_START_EXEC_ID,
        SET_QUEUED_CMD_STOP_EXEC_ID, reply_frame,
    };
    use crate::sim::SimArm;

    fn index_reply(id: u8, index: u64) -> Vec<u8> {
        reply_frame(id, 0x00, &index.to_le_bytes())
    }

    fn pose_reply(pose: Pose) -> Vec<u8> {
        let mut params = Vec::new();
        for value in [pose.x, pose.y, pose.z, pose.r, 0.0, 0.0, 0.0, 0.0] {
            params.extend_from_slice(&value.to_le_bytes());
        }
        reply_frame(GET_POSE_ID, 0x00, &params)
    }

    fn dobot(port: ScriptedPort) -> Dobot<ScriptedPort> {
        Dobot::new(port, false).with_poll_interval(Duration::ZERO)
    }

    fn sent_ids(dobot: Dobot<ScriptedPort>) -> Vec<u8> {
        dobot
            .link
            .into_inner()
            .port
            .map(|port| port.sent_ids())
            .unwrap_or_default()
    }

    #[test]
    fn initialise_runs_start_up_sequence() {
        let mut port = ScriptedPort::default();
        port.queue(&reply_frame(SET_QUEUED_CMD_START_EXEC_ID, 0x01, &[]));
        port.queue(&reply_frame(SET_QUEUED_CMD_CLEAR_ID, 0x01, &[]));
        port.queue(&index_reply(SET_PTP_JOINT_PARAMS_ID, 1));
        port.queue(&index_reply(SET_PTP_COORDINATE_PARAMS_ID, 2));
        port.queue(&index_reply(SET_PTP_JUMP_PARAMS_ID, 3));
        port.queue(&index_reply(SET_PTP_COMMON_PARAMS_ID, 4));
        port.queue(&pose_reply(Pose::new(242.2, 0.0, 151.3, 0.0)));

        let dobot = dobot(port);
        assert_eq!(dobot.initialise().unwrap(), Pose::new(242.2, 0.0, 151.3, 0.0));
        assert_eq!(
            sent_ids(dobot),
            vec![
                SET_QUEUED_CMD_START_EXEC_ID,
                SET_QUEUED_CMD_CLEAR_ID,
                SET_PTP_JOINT_PARAMS_ID,
                SET_PTP_COORDINATE_PARAMS_ID,
                SET_PTP_JUMP_PARAMS_ID,
                SET_PTP_COMMON_PARAMS_ID,
                GET_POSE_ID,
            ]
        );
    }

    #[test]
    fn blocking_move_waits_for_queue_index() {
        let mut port = ScriptedPort::default();
        port.queue(&index_reply(SET_PTP_CMD_ID, 5));
        port.queue(&index_reply(GET_QUEUED_CMD_CURRENT_INDEX_ID, 3));
        port.queue(&index_reply(GET_QUEUED_CMD_CURRENT_INDEX_ID, 4));
        port.queue(&index_reply(GET_QUEUED_CMD_CURRENT_INDEX_ID, 5));

        let dobot = dobot(port);
        dobot
            .move_to(Pose::new(200.0, 0.0, 150.0, 0.0), MoveMode::Blocking)
            .unwrap();
        assert_eq!(
            sent_ids(dobot),
            vec![
                SET_PTP_CMD_ID,
                GET_QUEUED_CMD_CURRENT_INDEX_ID,
                GET_QUEUED_CMD_CURRENT_INDEX_ID,
                GET_QUEUED_CMD_CURRENT_INDEX_ID,
            ]
        );
    }

    #[test]
    fn queued_moves_return_after_enqueue() {
        let mut port = ScriptedPort::default();
        port.queue(&index_reply(SET_PTP_CMD_ID, 1));
        port.queue(&index_reply(SET_PTP_CMD_ID, 2));

        let dobot = dobot(port);
        dobot
            .move_to(Pose::new(20.0, 0.0, 0.0, 0.0), MoveMode::Queued)
            .unwrap();
        dobot
            .move_to(Pose::new(40.0, 0.0, 0.0, 0.0), MoveMode::Queued)
            .unwrap();
        assert_eq!(sent_ids(dobot), vec![SET_PTP_CMD_ID, SET_PTP_CMD_ID]);
    }

    #[test]
    fn move_after_stop_restarts_queue() {
        let mut port = ScriptedPort::default();
        port.queue(&reply_frame(SET_QUEUED_CMD_STOP_EXEC_ID, 0x01, &[]));
        port.queue(&reply_frame(SET_QUEUED_CMD_CLEAR_ID, 0x01, &[]));
        port.queue(&reply_frame(SET_QUEUED_CMD_START_EXEC_ID, 0x01, &[]));
        port.queue(&index_reply(SET_PTP_CMD_ID, 9));
        let dobot = dobot(port);

        dobot.stop().unwrap();
        dobot
            .move_to(Pose::new(0.0, 0.0, 100.0, 0.0), MoveMode::Queued)
            .unwrap();
        assert!(!dobot.halted.load(Ordering::SeqCst));
        assert_eq!(
            sent_ids(dobot),
            vec![
                SET_QUEUED_CMD_STOP_EXEC_ID,
                SET_QUEUED_CMD_CLEAR_ID,
                SET_QUEUED_CMD_START_EXEC_ID,
                SET_PTP_CMD_ID,
            ]
        );
    }

    #[test]
    fn blocking_wait_reports_halt() {
        let dobot = dobot(ScriptedPort::default());
        dobot.halted.store(true, Ordering::SeqCst);
        assert!(matches!(dobot.wait_for(3), Err(ArmError::Halted)));
    }

    #[test]
    fn stop_waits_for_link_before_flagging_halt() {
        let mut port = ScriptedPort::default();
        port.queue(&reply_frame(SET_QUEUED_CMD_STOP_EXEC_ID, 0x01, &[]));
        let dobot = Arc::new(dobot(port));

        // a move holds the link and has just cleared the halt flag
        let link = dobot.link.lock();
        let stopper = {
            let dobot = Arc::clone(&dobot);
            thread::spawn(move || dobot.stop())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!dobot.halted.load(Ordering::SeqCst));
        drop(link);

        stopper.join().unwrap().unwrap();
        assert!(matches!(dobot.wait_for(5), Err(ArmError::Halted)));
    }

    #[test]
    fn closed_connection_rejects_operations() {
        let released = Arc::new(AtomicBool::new(false));
        let mut port = ScriptedPort::default();
        port.released = Some(Arc::clone(&released));
        let session = Session::new(Arc::new(dobot(port)));
        let arm = session.share();

        session.close().unwrap();
        assert!(released.load(Ordering::SeqCst));
        assert!(matches!(arm.pose(), Err(ArmError::Closed)));
        assert!(matches!(arm.close(), Err(ArmError::Closed)));
    }

    #[test]
    fn session_closes_exactly_once() {
        let arm = Arc::new(SimArm::instant());
        let session = Session::new(arm.clone());
        session.close().unwrap();
        assert_eq!(arm.close_count(), 1);

        {
            let _dropped = Session::new(arm.clone());
        }
        assert_eq!(arm.close_count(), 2);
    }
}
