//! 帧编解码
//!
//! 纯函数，不涉及 I/O。通知可能把一帧拆成多次送达，
//! 由 [`FrameAssembler`] 负责跨通知拼接。

use log::{trace, warn};

use crate::error::{FeederError, Result};
use crate::protocol::{CRC_SENTINEL, Command, FOOTER, INBOUND_HEADER, OUTBOUND_HEADER, hex};

/// HEADER + CMD + LEN
const PREFIX_LEN: usize = 3;
/// CRC + FOOTER
const SUFFIX_LEN: usize = 2;
pub const MIN_FRAME_LEN: usize = PREFIX_LEN + SUFFIX_LEN;
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// 拼接缓冲上限，超过后丢弃旧数据
const ASSEMBLER_CAPACITY: usize = 4 * (MIN_FRAME_LEN + MAX_PAYLOAD_LEN);

/// 已解码的入站帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub payload: Vec<u8>,
}

/// [`decode`] 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// 完整且格式正确的帧；`consumed` 含帧前的噪声字节
    Frame {
        code: u8,
        payload: Vec<u8>,
        consumed: usize,
    },
    /// 数据不足，等待更多通知
    Incomplete,
    /// 完整但无效的数据，调用方应丢弃前 `consumed` 字节
    Malformed { consumed: usize },
}

/// 编码出站命令
pub fn encode(command: Command, payload: &[u8]) -> Result<Vec<u8>> {
    encode_with_header(OUTBOUND_HEADER, command, payload)
}

/// 编码入站（设备应答）格式的帧，供模拟设备和测试使用
pub fn encode_reply(command: Command, payload: &[u8]) -> Result<Vec<u8>> {
    encode_with_header(INBOUND_HEADER, command, payload)
}

fn encode_with_header(header: u8, command: Command, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u8::try_from(payload.len()).map_err(|_| FeederError::Encoding(payload.len()))?;

    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    frame.push(header);
    frame.push(command.code());
    frame.push(len);
    frame.extend_from_slice(payload);
    frame.push(CRC_SENTINEL);
    frame.push(FOOTER);
    Ok(frame)
}

/// 以帧头开始的一段数据能否构成完整帧
enum Candidate {
    Complete(usize),
    Short,
    BadFooter,
}

fn candidate(frame: &[u8]) -> Candidate {
    if frame.len() < PREFIX_LEN {
        return Candidate::Short;
    }
    let total = PREFIX_LEN + frame[2] as usize + SUFFIX_LEN;
    if frame.len() < total {
        Candidate::Short
    } else if frame[total - 1] != FOOTER {
        Candidate::BadFooter
    } else {
        Candidate::Complete(total)
    }
}

/// 从缓冲区解码一帧入站数据
///
/// 先扫描入站帧头，再按声明长度检查帧尾位置。CRC 不校验。
/// 未收全的帧后面如果已经有一帧完整数据，前面的残片按格式错误丢弃。
pub fn decode(buffer: &[u8]) -> Decoded {
    if buffer.is_empty() {
        return Decoded::Incomplete;
    }

    let Some(start) = buffer.iter().position(|&b| b == INBOUND_HEADER) else {
        return Decoded::Malformed {
            consumed: buffer.len(),
        };
    };

    let frame = &buffer[start..];
    match candidate(frame) {
        Candidate::Complete(total) => Decoded::Frame {
            code: frame[1],
            payload: frame[PREFIX_LEN..total - SUFFIX_LEN].to_vec(),
            consumed: start + total,
        },
        // 只跳过这个帧头，后面的数据里可能还有真正的帧
        Candidate::BadFooter => Decoded::Malformed {
            consumed: start + 1,
        },
        Candidate::Short => {
            // 残缺帧之后已有完整帧时，残缺部分不会再被补全
            let later = (1..frame.len()).find(|&i| {
                frame[i] == INBOUND_HEADER && matches!(candidate(&frame[i..]), Candidate::Complete(_))
            });
            match later {
                Some(i) => Decoded::Malformed {
                    consumed: start + i,
                },
                None => Decoded::Incomplete,
            }
        }
    }
}

/// 跨通知拼接字节流并输出完整帧
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        trace!("<< {}", hex(chunk));
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > ASSEMBLER_CAPACITY {
            let excess = self.buffer.len() - ASSEMBLER_CAPACITY;
            warn!("Frame buffer overflow, dropping {} stale bytes", excess);
            self.buffer.drain(..excess);
        }
    }

    /// 取出下一个命令码已知的完整帧
    ///
    /// 格式错误的帧和未知命令码会被记录并丢弃。
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match decode(&self.buffer) {
                Decoded::Incomplete => return None,
                Decoded::Malformed { consumed } => {
                    warn!(
                        "Dropping malformed notification data: {}",
                        hex(&self.buffer[..consumed])
                    );
                    self.buffer.drain(..consumed);
                }
                Decoded::Frame {
                    code,
                    payload,
                    consumed,
                } => {
                    self.buffer.drain(..consumed);
                    match Command::try_from(code) {
                        Ok(command) => return Some(Frame { command, payload }),
                        Err(code) => {
                            warn!(
                                "Discarding frame with unknown command 0x{:02X}: {}",
                                code,
                                hex(&payload)
                            );
                        }
                    }
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
