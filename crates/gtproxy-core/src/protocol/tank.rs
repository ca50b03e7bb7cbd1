//! Tank sub-protocol: a fixed 56-byte little-endian struct plus an optional
//! extended tail whose length is declared in the struct's last field.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::protocol::buffer::{Buffer, Endian};
use crate::protocol::variant::Variant;
use crate::protocol::DecodeMode;

/// Size of the fixed struct on the wire.
pub const TANK_STRUCT_LEN: usize = 56;

macro_rules! tank_types {
    ($($variant:ident = $value:literal => $name:literal,)+) => {
        /// Tank packet sub-type (closed set).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        #[repr(u8)]
        pub enum TankType {
            $($variant = $value,)+
        }

        impl TankType {
            /// Wire name, as used in logs and capability declarations.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(TankType::$variant => $name,)+
                }
            }
        }

        impl TryFrom<u8> for TankType {
            type Error = CodecError;

            fn try_from(v: u8) -> Result<Self, CodecError> {
                match v {
                    $($value => Ok(TankType::$variant),)+
                    other => Err(CodecError::UnknownTankType(other)),
                }
            }
        }
    };
}

tank_types! {
    State = 0 => "STATE",
    CallFunction = 1 => "CALL_FUNCTION",
    UpdateStatus = 2 => "UPDATE_STATUS",
    TileChangeRequest = 3 => "TILE_CHANGE_REQUEST",
    SendMapData = 4 => "SEND_MAP_DATA",
    SendTileUpdateData = 5 => "SEND_TILE_UPDATE_DATA",
    SendTileUpdateDataMultiple = 6 => "SEND_TILE_UPDATE_DATA_MULTIPLE",
    TileActivateRequest = 7 => "TILE_ACTIVATE_REQUEST",
    TileApplyDamage = 8 => "TILE_APPLY_DAMAGE",
    SendInventoryState = 9 => "SEND_INVENTORY_STATE",
    ItemActivateRequest = 10 => "ITEM_ACTIVATE_REQUEST",
    ItemActivateObjectRequest = 11 => "ITEM_ACTIVATE_OBJECT_REQUEST",
    SendTileTreeState = 12 => "SEND_TILE_TREE_STATE",
    ModifyItemInventory = 13 => "MODIFY_ITEM_INVENTORY",
    ItemChangeObject = 14 => "ITEM_CHANGE_OBJECT",
    SendLock = 15 => "SEND_LOCK",
    SendItemDatabaseData = 16 => "SEND_ITEM_DATABASE_DATA",
    SendParticleEffect = 17 => "SEND_PARTICLE_EFFECT",
    SetIconState = 18 => "SET_ICON_STATE",
    ItemEffect = 19 => "ITEM_EFFECT",
    SetCharacterState = 20 => "SET_CHARACTER_STATE",
    PingReply = 21 => "PING_REPLY",
    PingRequest = 22 => "PING_REQUEST",
    GotPunched = 23 => "GOT_PUNCHED",
    AppCheckResponse = 24 => "APP_CHECK_RESPONSE",
    AppIntegrityFail = 25 => "APP_INTEGRITY_FAIL",
    Disconnect = 26 => "DISCONNECT",
    BattleJoin = 27 => "BATTLE_JOIN",
    BattleEvent = 28 => "BATTLE_EVENT",
    UseDoor = 29 => "USE_DOOR",
    SendParental = 30 => "SEND_PARENTAL",
    GoneFishin = 31 => "GONE_FISHIN",
    Steam = 32 => "STEAM",
    PetBattle = 33 => "PET_BATTLE",
    Npc = 34 => "NPC",
    Special = 35 => "SPECIAL",
    SendParticleEffectV2 = 36 => "SEND_PARTICLE_EFFECT_V2",
    ActivateArrowToItem = 37 => "ACTIVATE_ARROW_TO_ITEM",
    SelectTileIndex = 38 => "SELECT_TILE_INDEX",
    SendPlayerTributeData = 39 => "SEND_PLAYER_TRIBUTE_DATA",
    FtueSetItemToQuickInventory = 40 => "FTUE_SET_ITEM_TO_QUICK_INVENTORY",
    PveNpc = 41 => "PVE_NPC",
    PvpCardBattle = 42 => "PVP_CARD_BATTLE",
    PveApplyPlayerDamage = 43 => "PVE_APPLY_PLAYER_DAMAGE",
    PveNpcPositionUpdate = 44 => "PVE_NPC_POSITION_UPDATE",
    SetExtraMods = 45 => "SET_EXTRA_MODS",
    OnStepTileMod = 46 => "ON_STEP_TILE_MOD",
}

impl fmt::Display for TankType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tank packet flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TankFlags(pub u32);

impl TankFlags {
    pub const NONE: TankFlags = TankFlags(0);
    pub const WALK: TankFlags = TankFlags(1 << 0);
    pub const UNK2: TankFlags = TankFlags(1 << 1);
    pub const SPAWN_RELATED: TankFlags = TankFlags(1 << 2);
    /// Set whenever the packet carries an extended tail.
    pub const EXTENDED: TankFlags = TankFlags(1 << 3);
    pub const FACING_LEFT: TankFlags = TankFlags(1 << 4);
    pub const STANDING: TankFlags = TankFlags(1 << 5);
    pub const FIRE_DAMAGE: TankFlags = TankFlags(1 << 6);
    pub const JUMP: TankFlags = TankFlags(1 << 7);
    pub const GOT_KILLED: TankFlags = TankFlags(1 << 8);
    pub const PUNCH: TankFlags = TankFlags(1 << 9);
    pub const PLACE: TankFlags = TankFlags(1 << 10);
    pub const TILE_CHANGE: TankFlags = TankFlags(1 << 11);
    pub const GOT_PUNCHED: TankFlags = TankFlags(1 << 12);
    pub const RESPAWN: TankFlags = TankFlags(1 << 13);
    pub const OBJECT_COLLECT: TankFlags = TankFlags(1 << 14);
    pub const TRAMPOLINE: TankFlags = TankFlags(1 << 15);
    pub const DAMAGE: TankFlags = TankFlags(1 << 16);
    pub const SLIDE: TankFlags = TankFlags(1 << 17);
    pub const PARASOL: TankFlags = TankFlags(1 << 18);
    pub const UNK_GRAVITY_RELATED: TankFlags = TankFlags(1 << 19);
    pub const SWIM: TankFlags = TankFlags(1 << 20);
    pub const WALL_HANG: TankFlags = TankFlags(1 << 21);
    pub const POWER_UP_PUNCH_START: TankFlags = TankFlags(1 << 22);
    pub const POWER_UP_PUNCH_END: TankFlags = TankFlags(1 << 23);
    pub const UNK_TILE_CHANGE: TankFlags = TankFlags(1 << 24);
    pub const HAY_CART_RELATED: TankFlags = TankFlags(1 << 25);
    pub const ACID_RELATED_DAMAGE: TankFlags = TankFlags(1 << 26);
    pub const UNK3: TankFlags = TankFlags(1 << 27);
    pub const ACID_DAMAGE: TankFlags = TankFlags(1 << 28);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: TankFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: TankFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: TankFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for TankFlags {
    type Output = TankFlags;

    fn bitor(self, rhs: TankFlags) -> TankFlags {
        TankFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TankFlags {
    fn bitor_assign(&mut self, rhs: TankFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TankFlags {
    type Output = TankFlags;

    fn bitand(self, rhs: TankFlags) -> TankFlags {
        TankFlags(self.0 & rhs.0)
    }
}

/// Decoded tank packet.
///
/// The declared extended length is not stored: encode always writes the
/// actual length of `extended`.
#[derive(Debug, Clone, PartialEq)]
pub struct TankPacket {
    pub ty: TankType,
    pub object_type: u8,
    pub jump_count: u8,
    pub animation_type: u8,
    pub net_id: u32,
    pub target_net_id: i32,
    pub flags: TankFlags,
    pub float_var: f32,
    pub value: u32,
    pub vector_x: f32,
    pub vector_y: f32,
    pub vector_x2: f32,
    pub vector_y2: f32,
    pub particle_rotation: f32,
    pub int_x: i32,
    pub int_y: i32,
    pub extended: Bytes,
}

impl TankPacket {
    /// Zeroed packet of the given type.
    pub fn new(ty: TankType) -> Self {
        Self {
            ty,
            object_type: 0,
            jump_count: 0,
            animation_type: 0,
            net_id: 0,
            target_net_id: 0,
            flags: TankFlags::NONE,
            float_var: 0.0,
            value: 0,
            vector_x: 0.0,
            vector_y: 0.0,
            vector_x2: 0.0,
            vector_y2: 0.0,
            particle_rotation: 0.0,
            int_x: 0,
            int_y: 0,
            extended: Bytes::new(),
        }
    }

    /// Replace the extended tail and set the EXTENDED flag accordingly.
    pub fn set_extended(&mut self, data: impl Into<Bytes>) {
        self.extended = data.into();
        if self.extended.is_empty() {
            self.flags.remove(TankFlags::EXTENDED);
        } else {
            self.flags.insert(TankFlags::EXTENDED);
        }
    }

    pub fn decode(bytes: &[u8], mode: DecodeMode) -> Result<Self, CodecError> {
        if bytes.len() < TANK_STRUCT_LEN {
            return Err(CodecError::TruncatedStruct {
                need: TANK_STRUCT_LEN,
                have: bytes.len(),
            });
        }
        let mut buf = Buffer::from_slice(bytes, Endian::Little);
        let ty = TankType::try_from(buf.read_u8()?)?;
        let mut pkt = TankPacket::new(ty);
        pkt.object_type = buf.read_u8()?;
        pkt.jump_count = buf.read_u8()?;
        pkt.animation_type = buf.read_u8()?;
        pkt.net_id = buf.read_u32()?;
        pkt.target_net_id = buf.read_i32()?;
        pkt.flags = TankFlags(buf.read_u32()?);
        pkt.float_var = buf.read_f32()?;
        pkt.value = buf.read_u32()?;
        pkt.vector_x = buf.read_f32()?;
        pkt.vector_y = buf.read_f32()?;
        pkt.vector_x2 = buf.read_f32()?;
        pkt.vector_y2 = buf.read_f32()?;
        pkt.particle_rotation = buf.read_f32()?;
        pkt.int_x = buf.read_i32()?;
        pkt.int_y = buf.read_i32()?;
        let declared = buf.read_u32()? as usize;

        let actual = buf.remaining();
        if declared == actual {
            pkt.extended = buf.read_remaining();
            return Ok(pkt);
        }

        match mode {
            DecodeMode::Strict => Err(CodecError::ExtendedLenMismatch { declared, actual }),
            DecodeMode::Relaxed if actual < declared => {
                Err(CodecError::TruncatedExtendedData { declared, actual })
            }
            DecodeMode::Relaxed => {
                tracing::warn!(
                    tank_type = %ty,
                    declared,
                    actual,
                    "extended data longer than declared, truncating"
                );
                pkt.extended = buf.read_bytes(declared)?;
                Ok(pkt)
            }
        }
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        if !self.extended.is_empty() && !self.flags.contains(TankFlags::EXTENDED) {
            return Err(CodecError::ExtendedDataWithoutFlag {
                len: self.extended.len(),
            });
        }
        let declared = u32::try_from(self.extended.len()).map_err(|_| {
            CodecError::PrefixOverflow {
                len: self.extended.len(),
                max: u32::MAX as usize,
            }
        })?;
        let mut buf = Buffer::new(Endian::Little);
        buf.write_u8(self.ty as u8);
        buf.write_u8(self.object_type);
        buf.write_u8(self.jump_count);
        buf.write_u8(self.animation_type);
        buf.write_u32(self.net_id);
        buf.write_i32(self.target_net_id);
        buf.write_u32(self.flags.bits());
        buf.write_f32(self.float_var);
        buf.write_u32(self.value);
        buf.write_f32(self.vector_x);
        buf.write_f32(self.vector_y);
        buf.write_f32(self.vector_x2);
        buf.write_f32(self.vector_y2);
        buf.write_f32(self.particle_rotation);
        buf.write_i32(self.int_x);
        buf.write_i32(self.int_y);
        buf.write_u32(declared);
        buf.write_bytes(&self.extended);
        Ok(buf.into_bytes())
    }

    /// Decode the tail of a CALL_FUNCTION packet. `Ok(None)` for other types.
    pub fn call_function(&self) -> Result<Option<Variant>, CodecError> {
        if self.ty != TankType::CallFunction {
            return Ok(None);
        }
        Variant::decode(&self.extended).map(Some)
    }
}
