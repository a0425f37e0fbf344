//! RunLengthDecode codec

use log::warn;

const EOD: u8 = 128;

pub(super) fn decode(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut i = 0;

    while i < data.len() {
        let length = data[i];
        i += 1;

        match length {
            0..=127 => {
                let count = length as usize + 1;
                let end = i + count;
                if end > data.len() {
                    warn!("RunLength literal run truncated ({} of {} bytes)", data.len() - i, count);
                    output.extend_from_slice(&data[i..]);
                    break;
                }
                output.extend_from_slice(&data[i..end]);
                i = end;
            }
            EOD => break,
            _ => {
                let byte = match data.get(i) {
                    Some(&b) => b,
                    None => {
                        warn!("RunLength repeat run missing its byte");
                        break;
                    }
                };
                let count = 257 - length as usize;
                output.resize(output.len() + count, byte);
                i += 1;
            }
        }
    }

    output
}

pub(super) fn encode(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 128 + 2);
    let mut i = 0;
    let mut literal_start = 0;

    let flush_literals = |output: &mut Vec<u8>, from: usize, to: usize| {
        for chunk in data[from..to].chunks(128) {
            output.push((chunk.len() - 1) as u8);
            output.extend_from_slice(chunk);
        }
    };

    while i < data.len() {
        let mut run = 1;
        while i + run < data.len() && data[i + run] == data[i] && run < 128 {
            run += 1;
        }

        if run >= 2 {
            flush_literals(&mut output, literal_start, i);
            output.push((257 - run) as u8);
            output.push(data[i]);
            i += run;
            literal_start = i;
        } else {
            i += 1;
        }
    }

    flush_literals(&mut output, literal_start, data.len());
    output.push(EOD);
    output
}
