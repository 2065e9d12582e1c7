use alloy::{
    primitives::{address, Address},
    sol,
};

use crate::primitives::Chain;

sol! {
    #[allow(missing_docs)]
    interface CoreBridge {
        event LogMessagePublished(
            address indexed sender,
            uint64 sequence,
            uint32 nonce,
            bytes payload,
            uint8 consistencyLevel
        );
    }
}

pub use CoreBridge::LogMessagePublished;

/// Core bridge contract on the Aptos event-handle chain.
pub const APTOS_CORE_BRIDGE: &str =
    "0x5bc11445584a763c1fa7ed39081f1b920954da14e04b32440cba863d03e19625";

/// Core bridge contract on Injective, as reported in `wasm` event attributes.
pub const INJECTIVE_CORE_BRIDGE: &str = "inj17p9rzwnnfxcjp32un9ug7yhhzgtkhvl9l2q74d";

/// Returns the core bridge contract address on an EVM chain.
pub fn evm_core_bridge(chain: Chain) -> Option<Address> {
    let address = match chain {
        Chain::Ethereum | Chain::Bsc => address!("98f3c9e6E3fAce36bAAd05FE09d375Ef1464288B"),
        Chain::Polygon => address!("7A4B5a56256163F07b2C80A7cA55aBE66c4ec4d7"),
        Chain::Avalanche => address!("54a8e5f9c4CbA08F9943965859F6c34eAF03E26c"),
        Chain::Oasis => address!("fE8cD454b4A1CA468B57D79c0cc77Ef5B6f64585"),
        Chain::Fantom => address!("126783A6Cb203a3E35344528B26ca3a0489a1485"),
        Chain::Karura | Chain::Acala | Chain::Celo => {
            address!("a321448d90d4e5b0A732867c18eA198e75CAC48E")
        }
        Chain::Klaytn => address!("0C21603c4f3a6387e241c0091A7EA39E43E90bb7"),
        Chain::Moonbeam => address!("C8e2b0cD52Cf01b0Ce87d389Daa3d414d4cE29f3"),
        Chain::Arbitrum => address!("a5f208e072434bC67592E4C49C1B991BA79BCA46"),
        Chain::Optimism => address!("Ee91C335eab126dF5fDB3797EA9d6aD93aeC9722"),
        Chain::Solana | Chain::Injective | Chain::Aptos => return None,
    };

    Some(address)
}
