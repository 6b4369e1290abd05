use embedded_io::{Read, Write};

use log::{Level, log};

use crate::{ArmError, Pose};

const HEADER: u8 = 0xAA;

pub const GET_POSE_ID: u8 = 10;
pub const SET_PTP_JOINT_PARAMS_ID: u8 = 80;
pub const SET_PTP_COORDINATE_PARAMS_ID: u8 = 81;
pub const SET_PTP_JUMP_PARAMS_ID: u8 = 82;
pub const SET_PTP_COMMON_PARAMS_ID: u8 = 83;
pub const SET_PTP_CMD_ID: u8 = 84;
pub const SET_QUEUED_CMD_START_EXEC_ID: u8 = 240;
pub const SET_QUEUED_CMD_STOP_EXEC_ID: u8 = 241;
pub const SET_QUEUED_CMD_CLEAR_ID: u8 = 245;
pub const GET_QUEUED_CMD_CURRENT_INDEX_ID: u8 = 246;

const CTRL_WRITE: u8 = 0x01;
const CTRL_QUEUED: u8 = 0x02;

/// Point to point mode: joint interpolated move to a cartesian target.
pub const PTP_MOVJ_XYZ: u8 = 0x01;

/// Largest parameter block any command here sends or expects back.
pub const MAX_PARAMS: usize = 64;
/// Header (2) + length + id + ctrl + params + checksum.
pub const MAX_FRAME: usize = MAX_PARAMS + 6;

pub(crate) type Params = heapless::Vec<u8, MAX_PARAMS>;

pub(crate) enum Command {
    GetPose,
    SetPtpJointParams { velocity: f32, acceleration: f32 },
    SetPtpCoordinateParams { velocity: f32, acceleration: f32 },
    SetPtpJumpParams { jump: f32, limit: f32 },
    SetPtpCommonParams { velocity: f32, acceleration: f32 },
    SetPtpCmd { mode: u8, target: Pose },
    SetQueuedCmdStartExec,
    SetQueuedCmdStopExec,
    SetQueuedCmdClear,
    GetQueuedCmdCurrentIndex,
}

impl Command {
    pub(crate) fn id(&self) -> u8 {
        match self {
            Command::GetPose => GET_POSE_ID,
            Command::SetPtpJointParams { .. } => SET_PTP_JOINT_PARAMS_ID,
            Command::SetPtpCoordinateParams { .. } => SET_PTP_COORDINATE_PARAMS_ID,
            Command::SetPtpJumpParams { .. } => SET_PTP_JUMP_PARAMS_ID,
            Command::SetPtpCommonParams { .. } => SET_PTP_COMMON_PARAMS_ID,
            Command::SetPtpCmd { .. } => SET_PTP_CMD_ID,
            Command::SetQueuedCmdStartExec => SET_QUEUED_CMD_START_EXEC_ID,
            Command::SetQueuedCmdStopExec => SET_QUEUED_CMD_STOP_EXEC_ID,
            Command::SetQueuedCmdClear => SET_QUEUED_CMD_CLEAR_ID,
            Command::GetQueuedCmdCurrentIndex => GET_QUEUED_CMD_CURRENT_INDEX_ID,
        }
    }

    fn ctrl(&self) -> u8 {
        match self {
            Command::GetPose | Command::GetQueuedCmdCurrentIndex => 0x00,
            Command::SetQueuedCmdStartExec
            | Command::SetQueuedCmdStopExec
            | Command::SetQueuedCmdClear => CTRL_WRITE,
            _ => CTRL_WRITE | CTRL_QUEUED,
        }
    }

    fn params(&self) -> Result<Params, ArmError> {
        let mut params = Params::new();
        match self {
            Command::SetPtpJointParams {
                velocity,
                acceleration,
            } => {
                // four joints, velocities first
                put_f32s(&mut params, &[*velocity; 4])?;
                put_f32s(&mut params, &[*acceleration; 4])?;
            }
            Command::SetPtpCoordinateParams {
                velocity,
                acceleration,
            } => put_f32s(
                &mut params,
                &[*velocity, *velocity, *acceleration, *acceleration],
            )?,
            Command::SetPtpJumpParams { jump, limit } => put_f32s(&mut params, &[*jump, *limit])?,
            Command::SetPtpCommonParams {
                velocity,
                acceleration,
            } => put_f32s(&mut params, &[*velocity, *acceleration])?,
            Command::SetPtpCmd { mode, target } => {
                params.push(*mode).map_err(|_| ArmError::FrameOverflow)?;
                put_f32s(&mut params, &[target.x, target.y, target.z, target.r])?;
            }
            Command::GetPose
            | Command::GetQueuedCmdCurrentIndex
            | Command::SetQueuedCmdStartExec
            | Command::SetQueuedCmdStopExec
            | Command::SetQueuedCmdClear => {}
        }
        Ok(params)
    }

    pub(crate) fn write_buffer(&self, buffer: &mut [u8]) -> Result<usize, ArmError> {
        let params = self.params()?;
        let end = 5 + params.len();
        if buffer.len() < end + 1 {
            return Err(ArmError::FrameOverflow);
        }
        buffer[0] = HEADER;
        buffer[1] = HEADER;
        buffer[2] = (2 + params.len()) as u8; // id + ctrl + params
        buffer[3] = self.id();
        buffer[4] = self.ctrl();
        buffer[5..end].copy_from_slice(&params);
        buffer[end] = checksum(&buffer[3..end]);
        Ok(end + 1)
    }

    pub(crate) fn send_command<'a, P: Write + Read>(
        &self,
        port: &mut P,
        buffer: &'a mut [u8],
        verbose: bool,
    ) -> Result<Response<'a>, ArmError> {
        let level = if verbose { Level::Info } else { Level::Debug };
        let length = self.write_buffer(buffer)?;
        port.write_all(&buffer[..length])
            .map_err(|_| ArmError::WriteError)?;
        port.flush().map_err(|_| ArmError::WriteError)?;
        log!(level, "Command buffer: {:02x?}", &buffer[..length]);

        port.read_exact(&mut buffer[..3])
            .map_err(|_| ArmError::ReadError)?;
        let body = buffer[2] as usize;
        if 3 + body + 1 > buffer.len() {
            return Err(ArmError::FrameOverflow);
        }
        port.read_exact(&mut buffer[3..3 + body + 1])
            .map_err(|_| ArmError::ReadError)?;
        log!(level, "Response buffer: {:02x?}", &buffer[..3 + body + 1]);

        let response = Response::parse_response(&buffer[..3 + body + 1])?;
        if response.id != self.id() {
            return Err(ArmError::UnexpectedReply {
                expected: self.id(),
                received: response.id,
            });
        }
        Ok(response)
    }
}

fn put_f32s(params: &mut Params, values: &[f32]) -> Result<(), ArmError> {
    for value in values {
        params
            .extend_from_slice(&value.to_le_bytes())
            .map_err(|_| ArmError::FrameOverflow)?;
    }
    Ok(())
}

/// Two's complement of the byte sum, so id + ctrl + params + checksum wraps to zero.
fn checksum(body: &[u8]) -> u8 {
    let sum = body.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    0u8.wrapping_sub(sum)
}

#[derive(Debug)]
pub(crate) struct Response<'a> {
    id: u8,
    _ctrl: u8,
    params: &'a [u8],
}

impl<'a> Response<'a> {
    fn parse_response(buffer: &'a [u8]) -> Result<Response<'a>, ArmError> {
        if buffer.len() < 6 {
            return Err(ArmError::ReadError);
        }
        if buffer[0] != HEADER || buffer[1] != HEADER {
            return Err(ArmError::InvalidHeader(buffer[0], buffer[1]));
        }
        let length = buffer[2] as usize;
        if length < 2 || buffer.len() < 3 + length + 1 {
            return Err(ArmError::ReadError);
        }
        let received = buffer[3 + length];
        let calculated = checksum(&buffer[3..3 + length]);
        if calculated != received {
            return Err(ArmError::ChecksumMismatch(calculated, received));
        }
        Ok(Self {
            id: buffer[3],
            _ctrl: buffer[4],
            params: &buffer[5..3 + length],
        })
    }

    pub(crate) fn f32_at(&self, index: usize) -> Option<f32> {
        let bytes = self.params.get(index * 4..index * 4 + 4)?;
        Some(f32::from_le_bytes(bytes.try_into().ok()?))
    }

    pub(crate) fn pose(&self) -> Result<Pose, ArmError> {
        let axis = |index| self.f32_at(index).ok_or(ArmError::ShortReply(self.id));
        Ok(Pose::new(axis(0)?, axis(1)?, axis(2)?, axis(3)?))
    }

    pub(crate) fn queued_index(&self) -> Result<u64, ArmError> {
        let bytes = self.params.get(..8).ok_or(ArmError::ShortReply(self.id))?;
        let bytes: [u8; 8] = bytes.try_into().map_err(|_| ArmError::ShortReply(self.id))?;
        Ok(u64::from_le_bytes(bytes))
    }
}

/// Builds a reply frame the way the controller does. Used by tests to script
/// an in-memory port.
#[cfg(test)]
pub(crate) fn reply_frame(id: u8, ctrl: u8, params: &[u8]) -> Vec<u8> {
    let mut frame = vec![HEADER, HEADER, (2 + params.len()) as u8, id, ctrl];
    frame.extend_from_slice(params);
    frame.push(checksum(&frame[3..]));
    frame
}


#[cfg(test)]
mod tests {
    use super::mock::ScriptedPort;
    use super::*;

    #[test]
    fn test_ptp_command_buffer() {
        let cmd = Command::SetPtpCmd {
            mode: PTP_MOVJ_XYZ,
            target: Pose::new(200.0, 0.0, 150.0, 0.0),
        };
        let mut buffer = [0u8; MAX_FRAME];
        let length = cmd.write_buffer(&mut buffer).unwrap();

        assert_eq!(buffer[0], 0xAA, "Header byte 1 should be 0xAA");
        assert_eq!(buffer[1], 0xAA, "Header byte 2 should be 0xAA");
        assert_eq!(buffer[2], 19, "Length should be id + ctrl + mode + 4 floats");
        assert_eq!(buffer[3], SET_PTP_CMD_ID);
        assert_eq!(buffer[4], 0x03, "PTP commands are queued writes");
        assert_eq!(buffer[5], PTP_MOVJ_XYZ);
        assert_eq!(&buffer[6..10], &200.0f32.to_le_bytes());
        assert_eq!(&buffer[14..18], &150.0f32.to_le_bytes());
        assert_eq!(length, 23);

        let sum = buffer[3..length]
            .iter()
            .fold(0u8, |acc, byte| acc.wrapping_add(*byte));
        assert_eq!(sum, 0, "Checksum should zero the body sum");
    }

    #[test]
    fn test_get_pose_frame_matches_reference_bytes() {
        let mut buffer = [0u8; MAX_FRAME];
        let length = Command::GetPose.write_buffer(&mut buffer).unwrap();
        assert_eq!(&buffer[..length], &[0xAA, 0xAA, 0x02, 0x0A, 0x00, 0xF6]);
    }

    #[test]
    fn test_parse_pose_reply() {
        let mut params = Vec::new();
        for value in [242.2293f32, 0.0, 151.3549, 0.0, 0.0, 10.0, 20.0, 0.0] {
            params.extend_from_slice(&value.to_le_bytes());
        }
        let mut port = ScriptedPort::default();
        port.queue(&reply_frame(GET_POSE_ID, 0x00, &params));

        let mut buffer = [0u8; MAX_FRAME];
        let response = Command::GetPose
            .send_command(&mut port, &mut buffer, false)
            .unwrap();
        assert_eq!(
            response.pose().unwrap(),
            Pose::new(242.2293, 0.0, 151.3549, 0.0)
        );
    }

    #[test]
    fn test_rejects_corrupted_checksum() {
        let mut frame = reply_frame(GET_QUEUED_CMD_CURRENT_INDEX_ID, 0x00, &7u64.to_le_bytes());
        let last = frame.len() - 1;
        frame[last] = frame[last].wrapping_add(1);
        let mut port = ScriptedPort::default();
        port.queue(&frame);

        let mut buffer = [0u8; MAX_FRAME];
        let result = Command::GetQueuedCmdCurrentIndex.send_command(&mut port, &mut buffer, false);
        assert!(matches!(result, Err(ArmError::ChecksumMismatch(_, _))));
    }

    #[test]
    fn test_rejects_reply_for_other_command() {
        let mut port = ScriptedPort::default();
        port.queue(&reply_frame(SET_QUEUED_CMD_CLEAR_ID, 0x01, &[]));

        let mut buffer = [0u8; MAX_FRAME];
        let result = Command::GetPose.send_command(&mut port, &mut buffer, false);
        assert!(matches!(
            result,
            Err(ArmError::UnexpectedReply {
                expected: GET_POSE_ID,
                received: SET_QUEUED_CMD_CLEAR_ID
            })
        ));
    }

    #[test]
    fn test_short_pose_reply() {
        let mut port = ScriptedPort::default();
        port.queue(&reply_frame(GET_POSE_ID, 0x00, &1.0f32.to_le_bytes()));

        let mut buffer = [0u8; MAX_FRAME];
        let response = Command::GetPose
            .send_command(&mut port, &mut buffer, false)
            .unwrap();
        assert!(matches!(response.pose(), Err(ArmError::ShortReply(GET_POSE_ID))));
    }

    #[test]
    fn test_missing_reply_is_read_error() {
        let mut port = ScriptedPort::default();
        let mut buffer = [0u8; MAX_FRAME];
        let result = Command::GetPose.send_command(&mut port, &mut buffer, false);
        assert!(matches!(result, Err(ArmError::ReadError)));
    }
}
