use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse,
    parse_macro_input,
    DeriveInput,
};

#[proc_macro_derive(RegisterSerde)]
/// Derived on a packed_struct so register and flag words can go through the crate's
/// `Serialize`/`Deserialize` traits
pub fn derive_register_serde(tokens: TokenStream) -> TokenStream {
    let input = parse_macro_input!(tokens as DeriveInput);
    let word_name = input.ident;
    let generated = quote! {
        impl Serialize for #word_name {
            type Chunk = <Self as PackedStruct>::ByteArray;

            fn serialize(&self) -> Self::Chunk {
                self.pack().expect("Packing a register word can't fail")
            }
        }

        impl Deserialize for #word_name {
            type Chunk = <Self as PackedStruct>::ByteArray;

            fn deserialize(chunk: Self::Chunk) -> anyhow::Result<Self> {
                Ok(Self::unpack(&chunk)?)
            }
        }
    };
    TokenStream::from(generated)
}

#[proc_macro_attribute]
/// Attaches an FPGA register address to a register struct, implementing `Address`
pub fn address(attr: TokenStream, item: TokenStream) -> TokenStream {
    let num = match parse::<syn::Lit>(attr).expect("Error parsing attribute") {
        syn::Lit::Int(v) => v,
        _ => panic!("The register address must be a literal integer"),
    };
    let item = parse_macro_input!(item as DeriveInput);
    let ident = item.clone().ident;

    let generated = quote! {
        impl Address for #ident {
            fn addr() -> u8 {
                #num as u8
            }
        }
        #item
    };
    TokenStream::from(generated)
}
