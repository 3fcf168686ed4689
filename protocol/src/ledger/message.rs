//! Message compilation and the legacy message wire format.
//!
//! ```text
//! header        3 bytes  (required sigs, readonly signed, readonly unsigned)
//! account keys  shortvec<[u8; 32]>
//! blockhash     32 bytes (or the durable nonce value)
//! instructions  shortvec<(program idx u8, shortvec<u8> accounts, shortvec<u8> data)>
//! ```
//!
//! Account keys are ordered in four groups: writable signers (fee payer
//! first), readonly signers, writable non-signers, readonly non-signers.
//! Within a group, keys keep the order they first appeared in.

use serde::{Deserialize, Serialize};

use super::instruction::Instruction;
use super::pubkey::{Hash, Pubkey};
use super::shortvec;
use super::CodecError;

/// Counts that tell the runtime which keys sign and which are writable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed_accounts: u8,
    pub num_readonly_unsigned_accounts: u8,
}

/// An instruction with its keys replaced by indexes into `account_keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

/// A compiled, signable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
}

#[derive(Clone, Copy)]
struct KeyFlags {
    pubkey: Pubkey,
    is_signer: bool,
    is_writable: bool,
}

impl Message {
    /// Compile `instructions` with `payer` as fee payer.
    pub fn compile(
        instructions: &[Instruction],
        payer: &Pubkey,
        recent_blockhash: Hash,
    ) -> Result<Self, CodecError> {
        let mut keys: Vec<KeyFlags> = vec![KeyFlags {
            pubkey: *payer,
            is_signer: true,
            is_writable: true,
        }];

        let mut merge = |pubkey: Pubkey, is_signer: bool, is_writable: bool| {
            if let Some(existing) = keys.iter_mut().find(|k| k.pubkey == pubkey) {
                existing.is_signer |= is_signer;
                existing.is_writable |= is_writable;
            } else {
                keys.push(KeyFlags {
                    pubkey,
                    is_signer,
                    is_writable,
                });
            }
        };

        for ix in instructions {
            for meta in &ix.accounts {
                merge(meta.pubkey, meta.is_signer, meta.is_writable);
            }
            merge(ix.program_id, false, false);
        }

        // Stable partition into the four groups. The payer sits at index 0
        // of the first group because it was inserted first.
        let group = |k: &KeyFlags| match (k.is_signer, k.is_writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        };
        keys.sort_by_key(group);

        if keys.len() > u8::MAX as usize {
            return Err(CodecError::TooManyAccounts(keys.len()));
        }

        let count = |g: u8| keys.iter().filter(|k| group(k) == g).count() as u8;
        let header = MessageHeader {
            num_required_signatures: count(0) + count(1),
            num_readonly_signed_accounts: count(1),
            num_readonly_unsigned_accounts: count(3),
        };

        let account_keys: Vec<Pubkey> = keys.iter().map(|k| k.pubkey).collect();
        let index_of = |pubkey: &Pubkey| -> Result<u8, CodecError> {
            account_keys
                .iter()
                .position(|k| k == pubkey)
                .map(|i| i as u8)
                .ok_or(CodecError::AccountIndexOutOfRange)
        };

        let compiled = instructions
            .iter()
            .map(|ix| {
                Ok(CompiledInstruction {
                    program_id_index: index_of(&ix.program_id)?,
                    accounts: ix
                        .accounts
                        .iter()
                        .map(|m| index_of(&m.pubkey))
                        .collect::<Result<Vec<_>, _>>()?,
                    data: ix.data.clone(),
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        Ok(Self {
            header,
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    /// Keys that must sign, in signature order.
    pub fn signer_keys(&self) -> &[Pubkey] {
        let n = (self.header.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.signer_keys().first()
    }

    pub fn is_signer(&self, index: usize) -> bool {
        index < self.header.num_required_signatures as usize
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let h = &self.header;
        let signed = h.num_required_signatures as usize;
        if index >= self.account_keys.len() {
            return false;
        }
        if index < signed {
            index < signed - h.num_readonly_signed_accounts as usize
        } else {
            index < self.account_keys.len() - h.num_readonly_unsigned_accounts as usize
        }
    }

    /// Resolve a compiled instruction's account index to its key.
    pub fn account_key(&self, ix: &CompiledInstruction, position: usize) -> Option<&Pubkey> {
        ix.accounts
            .get(position)
            .and_then(|idx| self.account_keys.get(*idx as usize))
    }

    pub fn program_id(&self, ix: &CompiledInstruction) -> Option<&Pubkey> {
        self.account_keys.get(ix.program_id_index as usize)
    }

    /// Serialize to the bytes that get signed.
    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(3 + 1 + self.account_keys.len() * 32 + 32 + 64);
        out.push(self.header.num_required_signatures);
        out.push(self.header.num_readonly_signed_accounts);
        out.push(self.header.num_readonly_unsigned_accounts);

        shortvec::encode_len(self.account_keys.len(), &mut out)?;
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(self.recent_blockhash.as_bytes());

        shortvec::encode_len(self.instructions.len(), &mut out)?;
        for ix in &self.instructions {
            out.push(ix.program_id_index);
            shortvec::encode_len(ix.accounts.len(), &mut out)?;
            out.extend_from_slice(&ix.accounts);
            shortvec::encode_len(ix.data.len(), &mut out)?;
            out.extend_from_slice(&ix.data);
        }
        Ok(out)
    }

    /// Parse a message starting at `*offset`, advancing it past the message.
    pub fn deserialize_from(bytes: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        let header = MessageHeader {
            num_required_signatures: read_u8(bytes, offset)?,
            num_readonly_signed_accounts: read_u8(bytes, offset)?,
            num_readonly_unsigned_accounts: read_u8(bytes, offset)?,
        };

        let key_count = shortvec::decode_len(bytes, offset)?;
        let mut account_keys = Vec::with_capacity(key_count.min(64));
        for _ in 0..key_count {
            account_keys.push(Pubkey::new(read_array(bytes, offset)?));
        }
        let recent_blockhash = Hash::new(read_array(bytes, offset)?);

        let ix_count = shortvec::decode_len(bytes, offset)?;
        let mut instructions = Vec::with_capacity(ix_count.min(16));
        for _ in 0..ix_count {
            let program_id_index = read_u8(bytes, offset)?;
            let n = shortvec::decode_len(bytes, offset)?;
            let accounts = read_slice(bytes, offset, n)?.to_vec();
            let n = shortvec::decode_len(bytes, offset)?;
            let data = read_slice(bytes, offset, n)?.to_vec();
            instructions.push(CompiledInstruction {
                program_id_index,
                accounts,
                data,
            });
        }

        let message = Self {
            header,
            account_keys,
            recent_blockhash,
            instructions,
        };
        message.sanitize()?;
        Ok(message)
    }

    /// Parse a complete message with no trailing bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut offset = 0;
        let message = Self::deserialize_from(bytes, &mut offset)?;
        if offset != bytes.len() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(message)
    }

    /// Structural checks the ledger would also apply.
    fn sanitize(&self) -> Result<(), CodecError> {
        let h = &self.header;
        let n = self.account_keys.len();
        if h.num_required_signatures == 0
            || h.num_required_signatures as usize > n
            || h.num_readonly_signed_accounts >= h.num_required_signatures
            || h.num_readonly_unsigned_accounts as usize + h.num_required_signatures as usize > n
        {
            return Err(CodecError::InvalidHeader);
        }
        for ix in &self.instructions {
            if ix.program_id_index as usize >= n || ix.accounts.iter().any(|a| *a as usize >= n) {
                return Err(CodecError::AccountIndexOutOfRange);
            }
        }
        Ok(())
    }
}

fn read_u8(bytes: &[u8], offset: &mut usize) -> Result<u8, CodecError> {
    let b = *bytes.get(*offset).ok_or(CodecError::UnexpectedEnd)?;
    *offset += 1;
    Ok(b)
}

pub(crate) fn read_slice<'a>(
    bytes: &'a [u8],
    offset: &mut usize,
    len: usize,
) -> Result<&'a [u8], CodecError> {
    let end = offset.checked_add(len).ok_or(CodecError::UnexpectedEnd)?;
    let slice = bytes.get(*offset..end).ok_or(CodecError::UnexpectedEnd)?;
    *offset = end;
    Ok(slice)
}

pub(crate) fn read_array<const N: usize>(
    bytes: &[u8],
    offset: &mut usize,
) -> Result<[u8; N], CodecError> {
    let slice = read_slice(bytes, offset, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(slice);
    Ok(arr)
}
